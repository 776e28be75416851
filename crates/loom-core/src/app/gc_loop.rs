//! CleanupLoop - 保持期間切れのフロー・タスクの定期回収
//!
//! `cleanup_interval` ごとに `FlowManager::cleanup` を呼ぶだけのループ。
//! 読み取り系 API（get_all_flows）も都度 cleanup するので、このループは
//! 誰も問い合わせない間にメモリが伸び続けないためのもの。

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::flows::FlowManager;

/// Cleanup loop handle.
/// - `request_shutdown()` で次の tick を待たずに止まる
/// - `shutdown_and_join()` で終了を待てる
pub struct CleanupLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CleanupLoop {
    /// Spawn with the interval from the flow configuration.
    pub fn spawn(flows: FlowManager) -> Self {
        let interval = flows.config().cleanup_interval();
        Self::spawn_with_interval(flows, interval)
    }

    pub(crate) fn spawn_with_interval(flows: FlowManager, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            cleanup_loop(flows, interval, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver が先に落ちていても構わない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn cleanup_loop(
    flows: FlowManager,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // 初回 tick は即時に返るので読み捨てる
    ticker.tick().await;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }
        let evicted = flows.cleanup();
        debug!(evicted, "cleanup tick");
    }
    debug!("cleanup loop stopped");
}
