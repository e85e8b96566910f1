use crate::retry::{Backoff, Limit, RetryPolicy, SelectorKind};
use std::env;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reads `EUREKA_TIMEOUT_SECS` and the `EUREKA_RETRY_*` variables on top
    /// of the defaults. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "EUREKA_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs);
        }

        match lookup("EUREKA_RETRY_SELECTOR").as_deref() {
            None => {}
            Some("round-robin") => config.retry.selector = SelectorKind::RoundRobin,
            Some("random") => config.retry.selector = SelectorKind::Random,
            Some(other) => warn!("Ignoring unknown EUREKA_RETRY_SELECTOR: {}", other),
        }

        if let Some(max) = parse_var::<u32, _>(&lookup, "EUREKA_RETRY_LIMIT") {
            config.retry.limit = if max == 0 {
                Limit::Unlimited
            } else {
                Limit::Attempts(max)
            };
        }

        let delay = Duration::from_millis(
            parse_var::<u64, _>(&lookup, "EUREKA_RETRY_DELAY_MS").unwrap_or(100),
        );
        match lookup("EUREKA_RETRY_BACKOFF").as_deref() {
            None => {}
            Some("none") => config.retry.backoff = Backoff::None,
            Some("constant") => config.retry.backoff = Backoff::Constant(delay),
            Some("linear") => config.retry.backoff = Backoff::Linear(delay),
            Some("exponential") => config.retry.backoff = Backoff::Exponential(delay),
            Some(other) => warn!("Ignoring unknown EUREKA_RETRY_BACKOFF: {}", other),
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}: {}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(ClientConfig::from_lookup(lookup(&[])), ClientConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("EUREKA_TIMEOUT_SECS", "3"),
            ("EUREKA_RETRY_SELECTOR", "random"),
            ("EUREKA_RETRY_LIMIT", "5"),
            ("EUREKA_RETRY_BACKOFF", "exponential"),
            ("EUREKA_RETRY_DELAY_MS", "250"),
        ]));

        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.retry.selector, SelectorKind::Random);
        assert_eq!(config.retry.limit, Limit::Attempts(5));
        assert_eq!(config.retry.backoff, Backoff::Exponential(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let config = ClientConfig::from_lookup(lookup(&[("EUREKA_RETRY_LIMIT", "0")]));
        assert_eq!(config.retry.limit, Limit::Unlimited);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("EUREKA_TIMEOUT_SECS", "soon"),
            ("EUREKA_RETRY_BACKOFF", "fibonacci"),
        ]));
        assert_eq!(config, ClientConfig::default());
    }
}
