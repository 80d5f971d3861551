//! Serial port link.

use super::{deliver, notify_state, Link, LinkIndex, LinkSink};
use crate::error::{WireError, WireResult};
use crate::frame::{FrameDecoder, FrameProtocol};
use crate::message::Message;
use ssp_types::ComponentId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Frames over a serial device. The port is reopened after loss.
pub struct SerialLink {
    port: String,
    baud: u32,
    protocol: Arc<dyn FrameProtocol>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    online: Arc<AtomicBool>,
    probe_automatically: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialLink {
    pub fn new(port: impl Into<String>, baud: u32, protocol: Arc<dyn FrameProtocol>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            port: port.into(),
            baud,
            protocol,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            online: Arc::new(AtomicBool::new(false)),
            probe_automatically: true,
            task: Mutex::new(None),
        }
    }

    /// Opt out of unprompted announcements, e.g. for devices that
    /// misbehave when probed.
    pub fn with_probe_automatically(mut self, probe: bool) -> Self {
        self.probe_automatically = probe;
        self
    }
}

impl fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .field("online", &self.is_online())
            .finish()
    }
}

impl Link for SerialLink {
    fn name(&self) -> &str {
        &self.port
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn probe_automatically(&self) -> bool {
        self.probe_automatically
    }

    fn send(&self, to: ComponentId, message: &Message) -> WireResult<()> {
        if !self.is_online() {
            debug!(port = %self.port, %message, "SSP link: port closed, dropping frame");
            return Ok(());
        }
        let bytes = self.protocol.encode(to, message)?;
        self.outbound.send(bytes).map_err(|_| WireError::LinkClosed)
    }

    fn attach(&self, sink: Weak<dyn LinkSink>, index: LinkIndex) -> WireResult<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WireError::LinkClosed)?;
        let port = self.port.clone();
        let baud = self.baud;
        let online = self.online.clone();
        let mut decoder = FrameDecoder::new(self.protocol.clone());

        let handle = tokio::spawn(async move {
            loop {
                if sink.strong_count() == 0 {
                    break;
                }
                match tokio_serial::new(&port, baud).open_native_async() {
                    Ok(stream) => {
                        info!(port = %port, baud, "SSP link: serial port open");
                        online.store(true, Ordering::Relaxed);
                        notify_state(&sink, index, true);
                        let result =
                            pump(stream, &mut outbound_rx, &mut decoder, &sink, index).await;
                        online.store(false, Ordering::Relaxed);
                        decoder.reset();
                        // Frames queued while the port was down are stale.
                        while outbound_rx.try_recv().is_ok() {}
                        match result {
                            Ok(()) => info!(port = %port, "SSP link: serial port closed"),
                            Err(e) => warn!(port = %port, error = %e, "SSP link: serial port lost"),
                        }
                        notify_state(&sink, index, false);
                    }
                    Err(e) => debug!(port = %port, error = %e, "SSP link: can't open serial port"),
                }
                tokio::time::sleep(REOPEN_DELAY).await;
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn close(&self) {
        self.online.store(false, Ordering::Relaxed);
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Moves bytes both ways until the port fails or the sink is dropped.
async fn pump(
    mut stream: SerialStream,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    decoder: &mut FrameDecoder,
    sink: &Weak<dyn LinkSink>,
    index: LinkIndex,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                for frame in decoder.push(&buf[..n]) {
                    if !deliver(sink, index, frame) {
                        return Ok(());
                    }
                }
            }
            bytes = outbound.recv() => {
                let Some(bytes) = bytes else {
                    return Ok(());
                };
                stream.write_all(&bytes).await?;
                stream.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HexProtocol;
    use crate::protocol::protocol_ontology;

    #[test]
    fn test_closed_port_drops_sends() {
        let protocol: Arc<dyn FrameProtocol> =
            Arc::new(HexProtocol::new(protocol_ontology().unwrap()));
        let link = SerialLink::new("/dev/ttyUSB7", 115_200, protocol).with_probe_automatically(false);
        assert!(!link.is_online());
        assert!(!link.probe_automatically());
        assert_eq!(link.name(), "/dev/ttyUSB7");
        link.send(1, &Message::Get { var: vec![] }).unwrap();
    }
}
