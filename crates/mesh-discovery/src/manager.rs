use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mesh_protocol::NodeId;

use crate::error::DiscoveryError;
use crate::event::DiscoveryEvent;
use crate::mdns::{self, MdnsAdvertiser};
use crate::multicast;
use crate::node_info::NodeInfo;

/// Runs mDNS advertise/browse and the multicast fallback announcer/listener
/// side by side, merging both into one discovery-source-agnostic event
/// stream. A node already marked present is not re-emitted as `Discovered`
/// just because the other path also saw it.
pub struct DiscoveryManager {
    advertiser: Option<MdnsAdvertiser>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoveryManager {
    /// Start every discovery path and return the manager plus a receiver of
    /// deduplicated [`DiscoveryEvent`]s.
    pub fn start(node: NodeInfo, hostname: String) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
        let advertiser = MdnsAdvertiser::start(&node, &hostname)?;

        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (dedup_tx, dedup_rx) = mpsc::channel(64);

        let mdns_tx = raw_tx.clone();
        let mdns_task = tokio::spawn(async move {
            if let Err(e) = mdns::run_browser(mdns_tx).await {
                tracing::warn!(error = %e, "mdns browser stopped");
            }
        });

        let multicast_listener_tx = raw_tx.clone();
        let listener_task = tokio::spawn(async move {
            if let Err(e) = multicast::run_listener(multicast_listener_tx).await {
                tracing::warn!(error = %e, "multicast listener stopped");
            }
        });

        let announce_node = node.clone();
        let announcer_task = tokio::spawn(async move {
            if let Err(e) = multicast::run_announcer(move || announce_node.clone()).await {
                tracing::warn!(error = %e, "multicast announcer stopped");
            }
        });

        let dedup_task = tokio::spawn(dedup_loop(raw_rx, dedup_tx));

        Ok((
            Self { advertiser: Some(advertiser), tasks: vec![mdns_task, listener_task, announcer_task, dedup_task] },
            dedup_rx,
        ))
    }

    pub async fn shutdown(mut self) -> Result<(), DiscoveryError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.stop()?;
        }
        Ok(())
    }
}

async fn dedup_loop(mut raw_rx: mpsc::Receiver<DiscoveryEvent>, dedup_tx: mpsc::Sender<DiscoveryEvent>) {
    let present: Mutex<HashSet<NodeId>> = Mutex::new(HashSet::new());
    while let Some(event) = raw_rx.recv().await {
        let forward = match &event {
            DiscoveryEvent::Discovered(node) => present.lock().unwrap().insert(node.uuid),
            DiscoveryEvent::Removed(id) => present.lock().unwrap().remove(id),
        };
        if forward && dedup_tx.send(event).await.is_err() {
            return;
        }
    }
}
