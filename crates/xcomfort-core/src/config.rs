// ── Runtime session configuration ──
//
// Describes how to reach and authenticate with one bridge. Carries the
// auth key but never touches disk; `xcomfort-config` builds these from
// profiles.

use std::time::Duration;

use secrecy::SecretString;
use xcomfort_api::ClientIdentity;

/// Default bound on the whole handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the state dispatch queue.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Configuration for one bridge session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bridge host, `host:port`, or full `ws://` URL.
    pub address: String,
    /// Authentication key printed on the bridge.
    pub auth_key: SecretString,
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Undelivered state updates kept before the oldest are dropped.
    pub dispatch_capacity: usize,
    pub client: ClientIdentity,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth_key: SecretString::from(auth_key.into()),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            client: ClientIdentity::default(),
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff for reconnecting after the connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Attempts before the session gives up and closes. Default: 1.
    /// Zero disables reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 1,
        }
    }
}

impl ReconnectConfig {
    /// Exponential delay for `attempt` (0-based), capped at `max_delay`,
    /// spread by a deterministic jitter of ±25%.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX).min(30);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        Duration::try_from_secs_f64((capped * jitter_factor).max(0.0)).unwrap_or(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::new("192.168.1.20", "ABCD1234WXYZ");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 1);
        assert_eq!(config.dispatch_capacity, 256);
    }

    #[test]
    fn auth_key_is_redacted_in_debug() {
        let config = SessionConfig::new("192.168.1.20", "ABCD1234WXYZ");
        assert!(!format!("{config:?}").contains("ABCD1234WXYZ"));
    }

    #[test]
    fn first_attempt_uses_initial_delay() {
        // sin(0) = 0, so no jitter on the first attempt.
        assert_eq!(ReconnectConfig::default().backoff(0), Duration::from_secs(1));
    }

    #[test]
    fn backoff_is_capped() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 20,
        };
        let delay = config.backoff(12);
        assert!(delay <= Duration::from_millis(12_500), "{delay:?}");
    }

    #[test]
    fn huge_delays_saturate_instead_of_panicking() {
        let config = ReconnectConfig {
            initial_delay: Duration::MAX,
            max_delay: Duration::MAX,
            max_attempts: 5,
        };
        for attempt in 0..5 {
            assert!(config.backoff(attempt) <= Duration::MAX);
        }
        assert_eq!(config.backoff(1), Duration::MAX);
    }

    #[test]
    fn backoff_grows() {
        let config = ReconnectConfig::default();
        assert!(config.backoff(3) > config.backoff(0));
    }
}
