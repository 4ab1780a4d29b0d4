//! Background retention cleanup for old notifications.

use std::time::Duration;

use super::NotificationStore;

/// Spawn a task that deletes notifications older than `retention_days`,
/// once every `interval_secs`.
pub fn spawn_notification_cleanup(
    store: NotificationStore,
    retention_days: u32,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
            match store.purge_older_than(cutoff).await {
                Ok(0) => tracing::debug!("Notification retention cleanup: nothing to purge"),
                Ok(count) => tracing::info!("Notification retention cleanup: purged {} notifications", count),
                Err(e) => tracing::error!("Notification retention cleanup error: {}", e),
            }
        }
    })
}
