use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("visita_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_preserves_state_across_restart() {
        let path = test_wal_path("compactor_restart.wal");
        let notify = Arc::new(NotifyHub::new());
        let now = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(now));

        let vid = Ulid::new();
        {
            let engine = Engine::new(path.clone(), notify.clone(), clock.clone()).unwrap();
            engine
                .create_visit(vid, "Tour".into(), "".into(), 5)
                .await
                .unwrap();
            // Churn that compaction should erase
            for _ in 0..10 {
                let tmp = Ulid::new();
                engine
                    .create_visit(tmp, "Temp".into(), "".into(), 1)
                    .await
                    .unwrap();
                engine.delete_visit(tmp).await.unwrap();
            }
            engine.compact_wal().await.unwrap();
            assert_eq!(engine.wal_appends_since_compact().await, 0);
        }

        let engine2 = Engine::new(path, notify, clock).unwrap();
        let visits = engine2.list_visits().await;
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].id, vid);
    }
}
