use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use mesh_protocol::HEARTBEAT_INTERVAL_MS;

use crate::pool::ConnectionPool;

/// Drives outbound heartbeats and missed-heartbeat detection across every
/// connection in a [`ConnectionPool`] on a fixed tick: each
/// tick sends a fresh heartbeat and asks every connection to re-check its
/// own miss counter, which is what actually declares a connection `Failed`
/// after [`mesh_protocol::HEARTBEAT_MISSED_THRESHOLD`] consecutive misses.
pub struct HeartbeatMonitor {
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    pub fn start(pool: Arc<ConnectionPool>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
            loop {
                ticker.tick().await;
                for connection in pool.connections() {
                    let _ = connection.send_heartbeat();
                    let _ = connection.check_heartbeat();
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_protocol::NodeId;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn monitor_fails_a_connection_that_never_sees_a_heartbeat_reply() {
        let pool = Arc::new(ConnectionPool::new(NodeId::new_random()));
        let remote = NodeId::new_random();
        pool.connect(remote, "127.0.0.1:1".parse().unwrap()).await.unwrap();

        let monitor = HeartbeatMonitor::start(Arc::clone(&pool));

        // HEARTBEAT_INTERVAL_MS per tick; wait past the miss threshold.
        tokio::time::sleep(StdDuration::from_millis(HEARTBEAT_INTERVAL_MS * (mesh_protocol::HEARTBEAT_MISSED_THRESHOLD as u64 + 1))).await;

        let connection = pool.get(remote).unwrap();
        assert_eq!(connection.state(), crate::state::ConnectionState::Failed);

        monitor.stop();
        pool.shutdown().await;
    }
}
