//! UDP datagram link on the loopback interface.

use super::{deliver, notify_state, Link, LinkIndex, LinkSink};
use crate::error::{WireError, WireResult};
use crate::frame::{FrameDecoder, FrameProtocol};
use crate::message::Message;
use ssp_types::ComponentId;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receives on `127.0.0.1:rx_port`, sends to `127.0.0.1:tx_port`.
pub struct UdpLink {
    name: String,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    protocol: Arc<dyn FrameProtocol>,
    probe_automatically: bool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpLink {
    pub async fn bind(
        rx_port: u16,
        tx_port: u16,
        protocol: Arc<dyn FrameProtocol>,
    ) -> WireResult<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, rx_port)).await?;
        let local = socket.local_addr()?;
        info!(local = %local, tx_port, "SSP link: UDP socket bound");
        Ok(Self {
            name: format!("udp:{}->{tx_port}", local.port()),
            socket: Arc::new(socket),
            peer: SocketAddr::from((Ipv4Addr::LOCALHOST, tx_port)),
            protocol,
            probe_automatically: true,
            task: Mutex::new(None),
        })
    }

    pub fn with_probe_automatically(mut self, probe: bool) -> Self {
        self.probe_automatically = probe;
        self
    }

    pub fn local_addr(&self) -> WireResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpLink")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .finish()
    }
}

impl Link for UdpLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_online(&self) -> bool {
        true
    }

    fn probe_automatically(&self) -> bool {
        self.probe_automatically
    }

    fn send(&self, to: ComponentId, message: &Message) -> WireResult<()> {
        let bytes = self.protocol.encode(to, message)?;
        match self.socket.try_send_to(&bytes, self.peer) {
            Ok(_) => Ok(()),
            // Socket buffer full.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                warn!(link = %self.name, "SSP link: UDP send would block, dropping frame");
                Ok(())
            }
            // Nobody listening on the peer port yet.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => Ok(()),
            Err(e) => Err(WireError::Io(e)),
        }
    }

    fn attach(&self, sink: Weak<dyn LinkSink>, index: LinkIndex) -> WireResult<()> {
        let socket = self.socket.clone();
        let name = self.name.clone();
        let mut decoder = FrameDecoder::new(self.protocol.clone());
        let handle = tokio::spawn(async move {
            notify_state(&sink, index, true);
            let mut buf = [0u8; 2048];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, _)) => {
                        for frame in decoder.push(&buf[..n]) {
                            if !deliver(&sink, index, frame) {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(link = %name, error = %e, "SSP link: UDP receive failed"),
                }
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn close(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
