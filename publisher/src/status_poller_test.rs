#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use serde_json::json;

    use common::{StreamQuality, StreamStats, StreamStatusSnapshot};

    use crate::status_poller::*;
    use crate::testing::{GatedStatsSource, ScriptedStatsSource};

    fn live_stats() -> StreamStats {
        serde_json::from_value(json!({
            "alive": true,
            "bitrate": 3_200_000,
            "dropped_frames": 4,
            "clients": [{}, {}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_unknown() {
        let poller = StatusPoller::default();
        assert_eq!(poller.interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(poller.current(), StreamStatusSnapshot::default());
        assert_eq!(poller.current().quality.to_string(), "N/A");
        assert!(!poller.is_polling().await);
    }

    #[tokio::test]
    async fn test_zero_interval_uses_default() {
        assert_eq!(StatusPoller::new(Duration::ZERO).interval(), DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_every_interval() {
        let poller = StatusPoller::new(Duration::from_millis(5000));
        let source = ScriptedStatsSource::always(live_stats());

        assert!(poller.start(source.clone(), "cam1").await);
        tokio::time::sleep(Duration::from_millis(14_999)).await;

        assert_eq!(source.calls(), 3);
        assert_eq!(
            poller.current(),
            StreamStatusSnapshot {
                is_live: true,
                viewers: 2,
                quality: StreamQuality::Good,
                bitrate_kbps: 3200,
            }
        );
        assert!(poller.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_publishes_offline_snapshot() {
        let poller = StatusPoller::new(Duration::from_millis(1000));
        let source = ScriptedStatsSource::new(vec![Ok(live_stats())], Err(503));
        let mut updates = poller.subscribe();

        poller.start(source.clone(), "cam1").await;

        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update().is_live);

        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow_and_update(), StreamStatusSnapshot::offline());

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_ignored() {
        let poller = StatusPoller::new(Duration::from_millis(1000));
        let first = ScriptedStatsSource::always(live_stats());
        let second = ScriptedStatsSource::always(StreamStats::default());

        assert!(poller.start(first.clone(), "cam1").await);
        assert!(!poller.start(second.clone(), "cam2").await);
        assert_eq!(poller.polled_stream().await.as_deref(), Some("cam1"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(first.calls(), 3);
        assert_eq!(second.calls(), 0);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_updates() {
        let poller = StatusPoller::new(Duration::from_millis(1000));
        let source = ScriptedStatsSource::always(live_stats());

        poller.start(source.clone(), "cam1").await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls(), 2);

        assert!(poller.stop().await);
        assert!(!poller.stop().await);
        assert!(!poller.is_polling().await);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_in_flight_at_stop_is_discarded() {
        let poller = StatusPoller::new(Duration::from_millis(5000));
        let mut updates = poller.subscribe();
        let source = GatedStatsSource::new(live_stats());

        assert!(poller.start(source.clone(), "cam1").await);
        source.wait_entered().await;

        assert!(poller.stop().await);
        source.release();

        // the fetch completes on this thread; its result must not be published
        while !source.finished() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;

        assert_eq!(poller.current(), StreamStatusSnapshot::default());
        assert!(!updates.has_changed().unwrap());
        assert!(!poller.is_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let poller = StatusPoller::new(Duration::from_millis(1000));
        let source = ScriptedStatsSource::always(live_stats());

        poller.start(source.clone(), "cam1").await;
        poller.stop().await;
        assert!(poller.start(source.clone(), "cam2").await);
        assert_eq!(poller.polled_stream().await.as_deref(), Some("cam2"));
        poller.stop().await;
    }

    #[tokio::test]
    async fn test_poll_once() {
        let ok = ScriptedStatsSource::always(live_stats());
        let snapshot = StatusPoller::poll_once(ok.as_ref(), "cam1").await;
        assert!(snapshot.is_live);

        let failing: Arc<ScriptedStatsSource> = ScriptedStatsSource::new(Vec::new(), Err(500));
        let snapshot = StatusPoller::poll_once(failing.as_ref(), "cam1").await;
        assert_eq!(snapshot, StreamStatusSnapshot::offline());
    }
}
