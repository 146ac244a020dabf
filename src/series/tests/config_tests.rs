//! Tests for configuration defaults, JSON loading and validation.

#[cfg(test)]
mod tests {
    use crate::series::config::{
        DEFAULT_BACKFILL_PAGE_SIZE, DEFAULT_LONG_POLL_TIMEOUT, DEFAULT_MONITOR_PERIOD, SyncConfig,
    };
    use crate::series::error::SyncError;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.long_poll_timeout, Duration::from_secs(20));
        assert_eq!(config.eviction_period, Duration::from_secs(60));
        assert_eq!(config.local_trim_period, Duration::from_secs(60));
        assert_eq!(config.monitor_period, Duration::from_secs(1));
        assert_eq!(config.replication_retry_delay, Duration::from_millis(250));
        assert_eq!(config.backfill_page_size, 1_000);
        assert_eq!(config.fault_channel_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_overrides_only_given_fields() {
        let config = SyncConfig::from_json(r#"{ "monitor_period": 250, "backfill_page_size": 500 }"#)
            .unwrap();
        assert_eq!(config.monitor_period, Duration::from_millis(250));
        assert_eq!(config.backfill_page_size, 500);
        assert_eq!(config.long_poll_timeout, DEFAULT_LONG_POLL_TIMEOUT);
    }

    #[test]
    fn json_round_trip_uses_milliseconds() {
        let config = SyncConfig::default().with_long_poll_timeout(Duration::from_millis(1_500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["long_poll_timeout"], 1_500);
        let back: SyncConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn zero_periods_are_rejected() {
        let result = SyncConfig::from_json(r#"{ "monitor_period": 0 }"#);
        assert!(matches!(result, Err(SyncError::Config { message }) if message.contains("monitor_period")));

        let config = SyncConfig::default().with_backfill_page_size(0);
        assert!(config.validate().is_err());
        assert_eq!(DEFAULT_BACKFILL_PAGE_SIZE, 1_000);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            SyncConfig::from_json("{ not json"),
            Err(SyncError::Config { .. })
        ));
    }

    #[test]
    fn builders_chain() {
        let config = SyncConfig::default()
            .with_monitor_period(Duration::from_millis(10))
            .with_seed_periods(0)
            .with_fault_channel_capacity(8);
        assert_eq!(config.monitor_period, Duration::from_millis(10));
        assert_ne!(config.monitor_period, DEFAULT_MONITOR_PERIOD);
        assert_eq!(config.seed_periods, 0);
        assert_eq!(config.fault_channel_capacity, 8);
    }
}
