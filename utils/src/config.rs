use std::time::Duration;

use derive_builder::Builder;
use getset::Getters;
use serde::Deserialize;

/// `Duration` deserialization formatter
pub mod duration_format {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer};

    use crate::parse_duration;

    /// deserializes a duration string such as "50ms" or "3s"
    #[allow(single_use_lifetimes)] //  the false positive case blocks us
    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Log handler timing settings
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Getters, Builder)]
#[allow(clippy::module_name_repetitions, clippy::exhaustive_structs)]
pub struct LogHandlerConfig {
    /// Interval at which the leader writes keepalive entries; a follower
    /// whose max timestamp trails the leader by more than the keepalive
    /// interval plus the sync delay budget is considered out of sync
    #[builder(default = "default_keepalive_interval()")]
    #[serde(with = "duration_format", default = "default_keepalive_interval")]
    pub keepalive_interval: Duration,

    /// Tolerated replication delay before a follower is reported out of sync
    #[builder(default = "default_sync_delay_budget()")]
    #[serde(with = "duration_format", default = "default_sync_delay_budget")]
    pub sync_delay_budget: Duration,

    /// Minimum spacing between two non-blocking leader location renewals
    #[builder(default = "default_renew_leader_interval()")]
    #[serde(with = "duration_format", default = "default_renew_leader_interval")]
    pub renew_leader_interval: Duration,

    /// Sleep between two attempts of one reconfiguration command
    #[builder(default = "default_config_change_retry_interval()")]
    #[serde(
        with = "duration_format",
        default = "default_config_change_retry_interval"
    )]
    pub config_change_retry_interval: Duration,

    /// Ceiling for the per-attempt connect timeout of a reconfiguration RPC;
    /// the effective value is the smaller of this and the command deadline
    #[builder(default = "default_min_connect_timeout()")]
    #[serde(with = "duration_format", default = "default_min_connect_timeout")]
    pub min_connect_timeout: Duration,

    /// Timeout of the synchronous leader stat RPC issued by the sync monitor
    #[builder(default = "default_leader_stat_rpc_timeout()")]
    #[serde(with = "duration_format", default = "default_leader_stat_rpc_timeout")]
    pub leader_stat_rpc_timeout: Duration,

    /// Backoff step of a blocking append retry; attempt `n` sleeps
    /// `n * append_retry_sleep_step`, capped by `append_retry_sleep_cap`
    #[builder(default = "default_append_retry_sleep_step()")]
    #[serde(
        with = "duration_format",
        default = "default_append_retry_sleep_step"
    )]
    pub append_retry_sleep_step: Duration,

    /// Upper bound of one blocking append retry sleep
    #[builder(default = "default_append_retry_sleep_cap()")]
    #[serde(with = "duration_format", default = "default_append_retry_sleep_cap")]
    pub append_retry_sleep_cap: Duration,

    /// Minimum spacing between two repeated warning logs on a hot path
    #[builder(default = "default_warn_log_interval()")]
    #[serde(with = "duration_format", default = "default_warn_log_interval")]
    pub warn_log_interval: Duration,
}

impl LogHandlerConfig {
    /// A follower is in sync while `leader_max_ts - local_max_ts` stays
    /// within this threshold.
    #[inline]
    #[must_use]
    pub fn log_sync_threshold(&self) -> Duration {
        self.keepalive_interval.saturating_add(self.sync_delay_budget)
    }

    /// Interval between two synchronous leader stat polls, half the sync
    /// threshold so a follower crossing the threshold is seen within one
    /// threshold window.
    #[inline]
    #[must_use]
    pub fn sync_poll_interval(&self) -> Duration {
        self.log_sync_threshold() / 2
    }
}

impl Default for LogHandlerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive_interval(),
            sync_delay_budget: default_sync_delay_budget(),
            renew_leader_interval: default_renew_leader_interval(),
            config_change_retry_interval: default_config_change_retry_interval(),
            min_connect_timeout: default_min_connect_timeout(),
            leader_stat_rpc_timeout: default_leader_stat_rpc_timeout(),
            append_retry_sleep_step: default_append_retry_sleep_step(),
            append_retry_sleep_cap: default_append_retry_sleep_cap(),
            warn_log_interval: default_warn_log_interval(),
        }
    }
}

/// default keepalive interval
#[must_use]
#[inline]
pub const fn default_keepalive_interval() -> Duration {
    Duration::from_millis(100)
}

/// default sync delay budget
#[must_use]
#[inline]
pub const fn default_sync_delay_budget() -> Duration {
    Duration::from_secs(3)
}

/// default leader renew interval
#[must_use]
#[inline]
pub const fn default_renew_leader_interval() -> Duration {
    Duration::from_millis(500)
}

/// default reconfiguration retry interval
#[must_use]
#[inline]
pub const fn default_config_change_retry_interval() -> Duration {
    Duration::from_millis(50)
}

/// default connect timeout ceiling
#[must_use]
#[inline]
pub const fn default_min_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// default leader stat rpc timeout
#[must_use]
#[inline]
pub const fn default_leader_stat_rpc_timeout() -> Duration {
    Duration::from_millis(500)
}

/// default append retry sleep step
#[must_use]
#[inline]
pub const fn default_append_retry_sleep_step() -> Duration {
    Duration::from_micros(10)
}

/// default append retry sleep cap
#[must_use]
#[inline]
pub const fn default_append_retry_sleep_cap() -> Duration {
    Duration::from_micros(100)
}

/// default warn log interval
#[must_use]
#[inline]
pub const fn default_warn_log_interval() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_default_thresholds() {
        let config = LogHandlerConfig::default();
        assert_eq!(config.log_sync_threshold(), Duration::from_millis(3100));
        assert_eq!(config.sync_poll_interval(), Duration::from_millis(1550));
        assert_eq!(config.min_connect_timeout, Duration::from_secs(5));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_builder_overrides() {
        let config = LogHandlerConfigBuilder::default()
            .keepalive_interval(Duration::from_millis(200))
            .sync_delay_budget(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(config.log_sync_threshold(), Duration::from_millis(1200));
        assert_eq!(
            config.config_change_retry_interval,
            default_config_change_retry_interval()
        );
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_deserialize_from_toml() {
        let config: LogHandlerConfig = toml::from_str(
            r#"keepalive_interval = '150ms'
               sync_delay_budget = '2s'
               append_retry_sleep_step = '20us'"#,
        )
        .unwrap();
        assert_eq!(config.keepalive_interval, Duration::from_millis(150));
        assert_eq!(config.sync_delay_budget, Duration::from_secs(2));
        assert_eq!(config.append_retry_sleep_step, Duration::from_micros(20));
        assert_eq!(config.warn_log_interval, default_warn_log_interval());
    }
}
