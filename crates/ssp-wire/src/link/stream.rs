//! Link over any byte stream.

use super::{deliver, notify_state, Link, LinkIndex, LinkSink};
use crate::error::{WireError, WireResult};
use crate::frame::{FrameDecoder, FrameProtocol};
use crate::message::Message;
use ssp_types::ComponentId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READ_BUF_SIZE: usize = 1024;

/// Frames over an `AsyncRead + AsyncWrite` stream, e.g. a TCP socket or a
/// pipe. A reader task feeds the frame decoder and a writer task drains the
/// outbound queue.
pub struct StreamLink<S> {
    name: String,
    protocol: Arc<dyn FrameProtocol>,
    stream: Mutex<Option<S>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    online: Arc<AtomicBool>,
    probe_automatically: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(name: impl Into<String>, stream: S, protocol: Arc<dyn FrameProtocol>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            protocol,
            stream: Mutex::new(Some(stream)),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            online: Arc::new(AtomicBool::new(false)),
            probe_automatically: true,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_probe_automatically(mut self, probe: bool) -> Self {
        self.probe_automatically = probe;
        self
    }
}

impl<S> fmt::Debug for StreamLink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLink")
            .field("name", &self.name)
            .field("online", &self.online.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn probe_automatically(&self) -> bool {
        self.probe_automatically
    }

    fn send(&self, to: ComponentId, message: &Message) -> WireResult<()> {
        let bytes = self.protocol.encode(to, message)?;
        self.outbound.send(bytes).map_err(|_| WireError::LinkClosed)
    }

    fn attach(&self, sink: Weak<dyn LinkSink>, index: LinkIndex) -> WireResult<()> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WireError::LinkClosed)?;
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WireError::LinkClosed)?;
        let (mut reader, mut writer) = tokio::io::split(stream);
        self.online.store(true, Ordering::Relaxed);

        let name = self.name.clone();
        let online = self.online.clone();
        let mut decoder = FrameDecoder::new(self.protocol.clone());
        let read_task = tokio::spawn(async move {
            notify_state(&sink, index, true);
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!(link = %name, "SSP link: stream closed");
                        break;
                    }
                    Ok(n) => {
                        for frame in decoder.push(&buf[..n]) {
                            if !deliver(&sink, index, frame) {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(link = %name, error = %e, "SSP link: read failed");
                        break;
                    }
                }
            }
            online.store(false, Ordering::Relaxed);
            notify_state(&sink, index, false);
        });

        let name = self.name.clone();
        let write_task = tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                let written = match writer.write_all(&bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!(link = %name, error = %e, "SSP link: write failed");
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(read_task);
        tasks.push(write_task);
        Ok(())
    }

    fn close(&self) {
        self.online.store(false, Ordering::Relaxed);
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, HexProtocol};
    use crate::protocol::protocol_ontology;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward(UnboundedSender<Frame>);

    impl LinkSink for Forward {
        fn handle_frame(&self, _link: LinkIndex, frame: Frame) {
            let _ = self.0.send(frame);
        }

        fn link_state_changed(&self, _link: LinkIndex, _online: bool) {}
    }

    #[tokio::test]
    async fn test_stream_pair_exchanges_frames() {
        let protocol: Arc<dyn FrameProtocol> =
            Arc::new(HexProtocol::new(protocol_ontology().unwrap()));
        let (left, right) = tokio::io::duplex(256);
        let a = StreamLink::new("a", left, protocol.clone());
        let b = StreamLink::new("b", right, protocol);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn LinkSink> = Arc::new(Forward(tx));
        let (idle_tx, _idle_rx) = mpsc::unbounded_channel();
        let idle: Arc<dyn LinkSink> = Arc::new(Forward(idle_tx));
        a.attach(Arc::downgrade(&idle), 0).unwrap();
        b.attach(Arc::downgrade(&sink), 0).unwrap();
        assert!(a.is_online());

        let msg = Message::Get {
            var: vec!["speed".into()],
        };
        a.send(9, &msg).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.to, 9);
        assert_eq!(frame.message, msg);
    }

    #[tokio::test]
    async fn test_peer_hangup_goes_offline() {
        let protocol: Arc<dyn FrameProtocol> =
            Arc::new(HexProtocol::new(protocol_ontology().unwrap()));
        let (left, right) = tokio::io::duplex(64);
        let a = StreamLink::new("a", left, protocol);
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn LinkSink> = Arc::new(Forward(tx));
        a.attach(Arc::downgrade(&sink), 0).unwrap();
        drop(right);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!a.is_online());
    }
}
