//! Client configuration.

use std::cmp;
use std::time::Duration;

use sipua_transaction_core::timer::TimerSettings;

/// Tunable policy for a [`crate::client::Client`].
///
/// The defaults register for an hour, refresh at 90% of the granted
/// lifetime (never closer than 5 seconds to expiry), and drive transactions
/// with the standard SIP timer values.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transaction retransmission/timeout policy.
    pub timers: TimerSettings,
    /// Binding lifetime requested on REGISTER, in seconds.
    pub default_expiry: u32,
    /// Refresh this percentage of the granted lifetime before expiry.
    pub refresh_margin_percent: u32,
    /// Never refresh closer than this to expiry.
    pub min_refresh_margin: Duration,
    /// Capacity of the command channel feeding the dispatcher.
    pub command_capacity: usize,
    /// Capacity of the outward event stream.
    pub event_capacity: usize,
    /// Capacity of the internal timer channels.
    pub timer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            default_expiry: 3600,
            refresh_margin_percent: 10,
            min_refresh_margin: Duration::from_secs(5),
            command_capacity: 32,
            event_capacity: 128,
            timer_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Override the transaction timer policy.
    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    /// Override the requested binding lifetime.
    pub fn with_default_expiry(mut self, seconds: u32) -> Self {
        self.default_expiry = seconds;
        self
    }

    /// Override the refresh margin percentage.
    pub fn with_refresh_margin_percent(mut self, percent: u32) -> Self {
        self.refresh_margin_percent = percent;
        self
    }

    /// How long after a successful REGISTER the refresh should fire for a
    /// binding granted for `expiry_secs`.
    ///
    /// The margin is `refresh_margin_percent` of the lifetime, but at least
    /// `min_refresh_margin`; a lifetime shorter than the margin refreshes
    /// immediately.
    pub fn refresh_delay(&self, expiry_secs: u32) -> Duration {
        let margin = cmp::max(
            u64::from(expiry_secs) * u64::from(self.refresh_margin_percent) / 100,
            self.min_refresh_margin.as_secs(),
        );
        Duration::from_secs(u64::from(expiry_secs).saturating_sub(margin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_fires_at_ninety_percent_of_an_hour() {
        let config = ClientConfig::default();
        assert_eq!(config.refresh_delay(3600), Duration::from_secs(3240));
    }

    #[test]
    fn short_lifetimes_use_the_minimum_margin() {
        let config = ClientConfig::default();
        // 10% of 30s is 3s, below the 5s floor.
        assert_eq!(config.refresh_delay(30), Duration::from_secs(25));
    }

    #[test]
    fn tiny_lifetimes_refresh_immediately() {
        let config = ClientConfig::default();
        assert_eq!(config.refresh_delay(4), Duration::ZERO);
    }
}
