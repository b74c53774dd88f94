pub mod http;
pub mod tcp;

use crate::error::ProbeError;
use crate::retry::FixedRetryPolicy;
use crate::runtime::{duration_millis, sleep_with_shutdown};
use async_trait::async_trait;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

pub use http::HttpProber;
pub use tcp::TcpProber;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Tcp,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Http => "http",
            ProbeKind::Tcp => "tcp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeTarget {
    Http(Url),
    Tcp { host: String, port: u16 },
}

impl ProbeTarget {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeTarget::Http(_) => ProbeKind::Http,
            ProbeTarget::Tcp { .. } => ProbeKind::Tcp,
        }
    }

    /// Parses `host:port`, accepting bracketed IPv6 hosts such as `[::1]:5672`.
    pub fn parse_tcp(value: &str) -> Option<Self> {
        let (host, port) = value.trim().rsplit_once(':')?;
        let host = host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok().filter(|port| *port != 0)?;
        Some(ProbeTarget::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTarget::Http(url) => f.write_str(url.as_str()),
            ProbeTarget::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            ProbeTarget::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// One dependency check. Built once at startup and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSpec {
    name: String,
    target: ProbeTarget,
    retry: FixedRetryPolicy,
    attempt_timeout: Duration,
}

impl ProbeSpec {
    pub fn new(name: impl Into<String>, target: ProbeTarget) -> Self {
        Self {
            name: name.into(),
            target,
            retry: FixedRetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn http(name: impl Into<String>, url: Url) -> Self {
        Self::new(name, ProbeTarget::Http(url))
    }

    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(
            name,
            ProbeTarget::Tcp {
                host: host.into(),
                port,
            },
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry = FixedRetryPolicy::new(max_attempts, self.retry.delay());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry = FixedRetryPolicy::new(self.retry.max_attempts(), delay);
        self
    }

    pub fn with_retry_policy(mut self, retry: FixedRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProbeKind {
        self.target.kind()
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry.delay()
    }

    pub fn retry_policy(&self) -> FixedRetryPolicy {
        self.retry
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeOutcome {
    Reachable,
    TimedOut,
}

impl ProbeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeOutcome::Reachable => "REACHABLE",
            ProbeOutcome::TimedOut => "TIMED_OUT",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProbeResult {
    spec: ProbeSpec,
    outcome: ProbeOutcome,
    attempts_used: u32,
    elapsed: Duration,
    last_error: Option<String>,
}

impl ProbeResult {
    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome
    }

    pub fn is_reachable(&self) -> bool {
        self.outcome == ProbeOutcome::Reachable
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl Serialize for ProbeResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ProbeResult", 7)?;
        state.serialize_field("name", self.spec.name())?;
        state.serialize_field("kind", &self.spec.kind())?;
        state.serialize_field("target", &self.spec.target().to_string())?;
        state.serialize_field("outcome", &self.outcome)?;
        state.serialize_field("attempts_used", &self.attempts_used)?;
        state.serialize_field("max_attempts", &self.spec.max_attempts())?;
        state.serialize_field("elapsed_ms", &duration_millis(self.elapsed))?;
        state.serialize_field("last_error", &self.last_error)?;
        state.end()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeState {
    Pending,
    Attempting(u32),
    Reachable,
    TimedOut,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProbeState::Reachable | ProbeState::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeState::Pending => "PENDING",
            ProbeState::Attempting(_) => "ATTEMPTING",
            ProbeState::Reachable => "REACHABLE",
            ProbeState::TimedOut => "TIMED_OUT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("probe cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: ProbeState, to: ProbeState },
    #[error("attempt {attempt} is still in flight")]
    AttemptInFlight { attempt: u32 },
    #[error("no attempt is in flight")]
    NoAttemptInFlight,
}

/// Retry state machine for a single probe: `Pending -> Attempting(n) -> {Reachable, TimedOut}`.
#[derive(Clone, Debug)]
pub struct ProbeRun {
    policy: FixedRetryPolicy,
    state: ProbeState,
    attempts: u32,
    in_flight: bool,
}

impl ProbeRun {
    pub fn new(policy: FixedRetryPolicy) -> Self {
        Self {
            policy,
            state: ProbeState::Pending,
            attempts: 0,
            in_flight: false,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn begin_attempt(&mut self) -> Result<u32, TransitionError> {
        let next = self.attempts + 1;
        match self.state {
            ProbeState::Pending => {}
            ProbeState::Attempting(attempt) if self.in_flight => {
                return Err(TransitionError::AttemptInFlight { attempt })
            }
            ProbeState::Attempting(attempt) if attempt < self.policy.max_attempts() => {}
            from => {
                return Err(TransitionError::InvalidTransition {
                    from,
                    to: ProbeState::Attempting(next),
                })
            }
        }
        self.attempts = next;
        self.state = ProbeState::Attempting(next);
        self.in_flight = true;
        Ok(next)
    }

    pub fn record_success(&mut self) -> Result<ProbeState, TransitionError> {
        self.finish_attempt()?;
        self.state = ProbeState::Reachable;
        Ok(self.state)
    }

    /// Records a failed attempt; returns the pause before the next one, or `None` once
    /// the budget is exhausted and the run has moved to `TimedOut`.
    pub fn record_failure(&mut self) -> Result<Option<Duration>, TransitionError> {
        let attempt = self.finish_attempt()?;
        let delay = self.policy.next_delay(attempt);
        if delay.is_none() {
            self.state = ProbeState::TimedOut;
        }
        Ok(delay)
    }

    /// Stops the run early, keeping the attempts already started.
    pub fn abandon(&mut self) -> ProbeState {
        if !self.state.is_terminal() {
            self.in_flight = false;
            self.state = ProbeState::TimedOut;
        }
        self.state
    }

    fn finish_attempt(&mut self) -> Result<u32, TransitionError> {
        match self.state {
            ProbeState::Attempting(attempt) if self.in_flight => {
                self.in_flight = false;
                Ok(attempt)
            }
            _ => Err(TransitionError::NoAttemptInFlight),
        }
    }
}

/// A single reachability attempt against one dependency.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn attempt(&self, spec: &ProbeSpec) -> Result<(), ProbeError>;
}

#[async_trait]
impl<P> Prober for Arc<P>
where
    P: Prober + ?Sized,
{
    async fn attempt(&self, spec: &ProbeSpec) -> Result<(), ProbeError> {
        (**self).attempt(spec).await
    }
}

/// Dispatches each probe to the HTTP or TCP checker matching its target.
#[derive(Clone)]
pub struct NetworkProber {
    http: HttpProber,
    tcp: TcpProber,
}

impl NetworkProber {
    pub fn new() -> crate::error::Result<Self> {
        Ok(Self {
            http: HttpProber::new()?,
            tcp: TcpProber,
        })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn attempt(&self, spec: &ProbeSpec) -> Result<(), ProbeError> {
        match spec.target() {
            ProbeTarget::Http(url) => self.http.check(url).await,
            ProbeTarget::Tcp { host, port } => self.tcp.check(host, *port).await,
        }
    }
}

/// Polls one dependency until it answers, the attempt budget runs out, or `shutdown` fires.
pub async fn execute(
    spec: &ProbeSpec,
    prober: &dyn Prober,
    shutdown: &CancellationToken,
) -> ProbeResult {
    let started = Instant::now();
    let mut run = ProbeRun::new(spec.retry_policy());
    let mut last_error: Option<String> = None;
    let target = spec.target().to_string();

    loop {
        if shutdown.is_cancelled() {
            run.abandon();
            crate::probe_event!(
                warn,
                format!("stopped waiting for {}", spec.name()),
                probe = spec.name(),
                endpoint = target,
                attempts = run.attempts()
            );
            break;
        }

        let attempt = match run.begin_attempt() {
            Ok(attempt) => attempt,
            Err(err) => {
                reject_transition(spec, &mut run, err);
                break;
            }
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = timeout(spec.attempt_timeout(), prober.attempt(spec)) => Some(result),
        };

        let error = match result {
            None => continue,
            Some(Ok(Ok(()))) => {
                if let Err(err) = run.record_success() {
                    reject_transition(spec, &mut run, err);
                    break;
                }
                crate::probe_event!(
                    info,
                    format!("{} is reachable", spec.name()),
                    probe = spec.name(),
                    endpoint = target,
                    attempt = attempt
                );
                break;
            }
            Some(Ok(Err(err))) => err,
            Some(Err(_elapsed)) => attempt_timed_out(spec, &target),
        };

        let next_delay = match run.record_failure() {
            Ok(next_delay) => next_delay,
            Err(err) => {
                last_error = Some(error.to_string());
                reject_transition(spec, &mut run, err);
                break;
            }
        };
        crate::probe_event!(
            info,
            format!("waiting for {}", spec.name()),
            probe = spec.name(),
            endpoint = target,
            attempt = attempt,
            max_attempts = spec.max_attempts(),
            reason = error.reason()
        );
        last_error = Some(error.to_string());

        match next_delay {
            Some(delay) => {
                sleep_with_shutdown(delay, shutdown).await;
            }
            None => break,
        }
    }

    let elapsed = started.elapsed();
    let outcome = match run.state() {
        ProbeState::Reachable => ProbeOutcome::Reachable,
        _ => ProbeOutcome::TimedOut,
    };

    if outcome == ProbeOutcome::TimedOut {
        crate::probe_event!(
            error,
            format!("{} is unavailable", spec.name()),
            probe = spec.name(),
            endpoint = target,
            attempts = run.attempts(),
            duration_ms = duration_millis(elapsed)
        );
    }

    ProbeResult {
        spec: spec.clone(),
        outcome,
        attempts_used: run.attempts(),
        elapsed,
        last_error,
    }
}

/// Ends the run after the state machine refused a move, so the bug shows up in the logs.
fn reject_transition(spec: &ProbeSpec, run: &mut ProbeRun, err: TransitionError) {
    tracing::warn!(
        probe = %spec.name(),
        state = run.state().as_str(),
        attempts = run.attempts(),
        error = %err,
        "probe run rejected transition"
    );
    run.abandon();
}

fn attempt_timed_out(spec: &ProbeSpec, target: &str) -> ProbeError {
    let reason = format!(
        "attempt timed out after {}",
        humantime::format_duration(spec.attempt_timeout())
    );
    match spec.kind() {
        ProbeKind::Http => ProbeError::http(target, reason),
        ProbeKind::Tcp => ProbeError::tcp(target, reason),
    }
}
