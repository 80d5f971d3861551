//! Periodic neighbor probing.
//!
//! Every link whose neighbor is still unknown gets our `cinfo`, first after
//! a short delay so links can come up, then at a fixed interval.

use crate::node::Node;
use ssp_types::config::NetworkConfig;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to the probing task of one node.
pub struct Networker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Networker {
    /// Starts probing on behalf of `node`. The task ends with the node.
    pub fn spawn(node: Weak<Node>, config: NetworkConfig) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let first = Duration::from_millis(config.first_probe_ms);
        let interval = Duration::from_millis(config.probe_interval_ms.max(1));
        info!(
            first_probe_ms = config.first_probe_ms,
            probe_interval_ms = config.probe_interval_ms,
            "SSP networker: starting"
        );

        let handle = tokio::spawn(async move {
            let mut delay = first;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("SSP networker: shutdown signal received");
                        break;
                    }
                }
                let Some(node) = node.upgrade() else {
                    break;
                };
                let probed = node.probe_unknown_neighbors();
                if probed > 0 {
                    debug!(links = probed, "SSP networker: probed");
                }
                delay = interval;
            }
        });
        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        let _ = self.shutdown.send(true);
        self.handle.abort();
    }
}
