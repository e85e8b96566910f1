//! Retry strategy for registry requests.
//!
//! A [`Strategy`] drives one logical operation through one or more attempts.
//! Each attempt waits according to a [`Delay`], targets the endpoint picked
//! by a [`Selector`] and runs only while the [`Limiter`] allows it.


use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointsError {
    #[error("at least one registry endpoint is required")]
    Empty,
}

/// Ordered, non-empty list of registry base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints(Arc<[String]>);

impl Endpoints {
    /// Strips trailing slashes and whitespace from every endpoint.
    pub fn new<I, S>(endpoints: I) -> Result<Self, EndpointsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| {
                e.as_ref()
                    .trim_end_matches(|c: char| c == '/' || c.is_whitespace())
                    .to_string()
            })
            .collect();

        if endpoints.is_empty() {
            return Err(EndpointsError::Empty);
        }

        Ok(Self(endpoints.into()))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub trait Selector: Send + Sync {
    /// Endpoint to use for the given attempt.
    fn endpoint(&self, attempt: u32) -> &str;
}

pub trait Limiter: Send + Sync {
    /// Whether the given attempt may be made.
    fn allow(&self, attempt: u32) -> bool;
}

pub trait Delay: Send + Sync {
    /// How long to wait before the given attempt.
    fn delay(&self, attempt: u32) -> Duration;
}

/// Cycles through the endpoints in configuration order.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    endpoints: Endpoints,
}

impl Selector for RoundRobin {
    fn endpoint(&self, attempt: u32) -> &str {
        let endpoints = self.endpoints.as_slice();
        &endpoints[attempt as usize % endpoints.len()]
    }
}

/// Picks a uniformly random endpoint on every attempt.
#[derive(Debug, Clone)]
pub struct Random {
    endpoints: Endpoints,
}

impl Selector for Random {
    fn endpoint(&self, _attempt: u32) -> &str {
        let endpoints = self.endpoints.as_slice();
        &endpoints[rand::thread_rng().gen_range(0..endpoints.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    /// At most this many attempts in total.
    Attempts(u32),
}

impl Limit {
    pub fn no_retries() -> Self {
        Limit::Attempts(1)
    }
}

impl Limiter for Limit {
    fn allow(&self, attempt: u32) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Attempts(max) => attempt < *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    /// Fixed wait between attempts; the first attempt never waits.
    Constant(Duration),
    Linear(Duration),
    Exponential(Duration),
}

impl Delay for Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Constant(_) if attempt == 0 => Duration::ZERO,
            Backoff::Constant(d) => d,
            Backoff::Linear(d) => d.saturating_mul(attempt),
            Backoff::Exponential(d) => exponential_delay(d, attempt),
        }
    }
}

// 2^attempt * base, saturating at Duration::MAX
fn exponential_delay(base: Duration, attempt: u32) -> Duration {
    let nanos = 1u128
        .checked_shl(attempt)
        .and_then(|factor| base.as_nanos().checked_mul(factor));

    match nanos {
        Some(nanos) => {
            let secs = nanos / 1_000_000_000;
            let subsec = (nanos % 1_000_000_000) as u32;
            u64::try_from(secs).map_or(Duration::MAX, |secs| Duration::new(secs, subsec))
        }
        None if base.is_zero() => Duration::ZERO,
        None => Duration::MAX,
    }
}

pub fn round_robin(endpoints: Endpoints) -> RoundRobin {
    RoundRobin { endpoints }
}

pub fn random(endpoints: Endpoints) -> Random {
    Random { endpoints }
}

pub fn no_limit() -> Limit {
    Limit::Unlimited
}

pub fn limit(max: u32) -> Limit {
    Limit::Attempts(max)
}

pub fn no_retries() -> Limit {
    Limit::no_retries()
}

pub fn no_delay() -> Backoff {
    Backoff::None
}

pub fn constant(delay: Duration) -> Backoff {
    Backoff::Constant(delay)
}

pub fn linear(delay: Duration) -> Backoff {
    Backoff::Linear(delay)
}

pub fn exponential(delay: Duration) -> Backoff {
    Backoff::Exponential(delay)
}

pub struct Strategy<S, L, D> {
    selector: S,
    limiter: L,
    delay: D,
}

impl<S: Selector, L: Limiter, D: Delay> Strategy<S, L, D> {
    pub fn new(selector: S, limiter: L, delay: D) -> Self {
        Self {
            selector,
            limiter,
            delay,
        }
    }

    /// Runs `action` until it succeeds or the limiter refuses the next
    /// attempt. Only the last failure is returned.
    pub async fn apply<T, E, F, Fut>(&self, mut action: F) -> Result<T, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            let wait = self.delay.delay(attempt);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let endpoint = self.selector.endpoint(attempt).to_string();
            debug!(attempt, endpoint = %endpoint, "Executing registry request");

            match action(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, endpoint = %endpoint, "Registry request failed: {}", e);
                    attempt = attempt.saturating_add(1);
                    if !self.limiter.allow(attempt) {
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorKind {
    #[default]
    RoundRobin,
    Random,
}

/// Endpoint selection, attempt limit and delay for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub selector: SelectorKind,
    pub limit: Limit,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            selector: SelectorKind::RoundRobin,
            limit: Limit::Attempts(3),
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn strategy(&self, endpoints: Endpoints) -> Strategy<Box<dyn Selector>, Limit, Backoff> {
        let selector: Box<dyn Selector> = match self.selector {
            SelectorKind::RoundRobin => Box::new(round_robin(endpoints)),
            SelectorKind::Random => Box::new(random(endpoints)),
        };
        Strategy::new(selector, self.limit, self.backoff)
    }
}

impl<T: Selector + ?Sized> Selector for Box<T> {
    fn endpoint(&self, attempt: u32) -> &str {
        (**self).endpoint(attempt)
    }
}
