//! In-process link pair.

use super::{deliver, notify_state, Link, LinkIndex, LinkSink};
use crate::error::{WireError, WireResult};
use crate::frame::Frame;
use crate::message::Message;
use ssp_types::ComponentId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

type Envelope = (ComponentId, Message);

/// One end of an in-process pair. Messages pass without encoding.
pub struct LocalLink {
    name: String,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    /// Cleared when either end closes.
    open: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalLink {
    /// Two links, each delivering into the other.
    pub fn pair(name_a: &str, name_b: &str) -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let end = |name: &str,
                   tx: mpsc::UnboundedSender<Envelope>,
                   rx: mpsc::UnboundedReceiver<Envelope>| Self {
            name: name.to_string(),
            tx,
            rx: Mutex::new(Some(rx)),
            open: open.clone(),
            task: Mutex::new(None),
        };
        (end(name_a, tx_a, rx_a), end(name_b, tx_b, rx_b))
    }
}

impl fmt::Debug for LocalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLink")
            .field("name", &self.name)
            .field("online", &self.is_online())
            .finish()
    }
}

impl Link for LocalLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn send(&self, to: ComponentId, message: &Message) -> WireResult<()> {
        if !self.is_online() {
            return Err(WireError::LinkClosed);
        }
        self.tx
            .send((to, message.clone()))
            .map_err(|_| WireError::LinkClosed)
    }

    fn attach(&self, sink: Weak<dyn LinkSink>, index: LinkIndex) -> WireResult<()> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(WireError::LinkClosed)?;
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            notify_state(&sink, index, true);
            while let Some((to, message)) = rx.recv().await {
                if !deliver(&sink, index, Frame::new(to, message)) {
                    break;
                }
            }
            debug!(link = %name, "SSP link: local delivery stopped");
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
