use crate::probe::{execute, ProbeResult, ProbeSpec, Prober};
use crate::runtime::duration_millis;
use futures_util::future::join_all;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Declaration order, one probe at a time, stopping at the first failure.
    #[default]
    Sequential,
    /// All probes at once; every failure is reported.
    Concurrent,
}

impl GateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GateMode::Sequential => "sequential",
            GateMode::Concurrent => "concurrent",
        }
    }
}

impl FromStr for GateMode {
    type Err = crate::error::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(GateMode::Sequential),
            "concurrent" => Ok(GateMode::Concurrent),
            other => Err(crate::err!(
                "unknown gate mode `{other}` (expected `sequential` or `concurrent`)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Running,
    Ready,
    Failed,
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::Ready | GateState::Failed)
    }

    pub fn can_transition_to(self, next: GateState) -> bool {
        matches!(
            (self, next),
            (GateState::Pending, GateState::Running)
                | (GateState::Running, GateState::Ready)
                | (GateState::Running, GateState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Pending => "PENDING",
            GateState::Running => "RUNNING",
            GateState::Ready => "READY",
            GateState::Failed => "FAILED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Ready,
    Failed,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Ready => "READY",
            GateStatus::Failed => "FAILED",
        }
    }
}

/// Outcome of one gate invocation. Results appear in declaration order.
#[derive(Clone, Debug)]
pub struct GateReport {
    mode: GateMode,
    status: GateStatus,
    results: Vec<ProbeResult>,
    first_failure: Option<usize>,
    elapsed: Duration,
}

impl GateReport {
    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn status(&self) -> GateStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == GateStatus::Ready
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn first_failure(&self) -> Option<&ProbeResult> {
        self.first_failure.and_then(|index| self.results.get(index))
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|result| !result.is_reachable())
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn ensure_ready(self) -> Result<GateReport, GateFailure> {
        if self.is_ready() {
            Ok(self)
        } else {
            Err(GateFailure { report: self })
        }
    }
}

impl fmt::Display for GateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "readiness gate {} ({} probe(s), {})",
            self.status.as_str(),
            self.results.len(),
            self.mode.as_str()
        )?;
        for result in &self.results {
            let spec = result.spec();
            write!(
                f,
                "  {} [{} {}] {} after {} attempt(s) in {}ms",
                spec.name(),
                spec.kind().as_str(),
                spec.target(),
                result.outcome().as_str(),
                result.attempts_used(),
                duration_millis(result.elapsed())
            )?;
            if let Some(error) = result.last_error().filter(|_| !result.is_reachable()) {
                write!(f, ": {error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Serialize for GateReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("GateReport", 5)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("mode", &self.mode)?;
        state.serialize_field("elapsed_ms", &duration_millis(self.elapsed))?;
        state.serialize_field(
            "first_failure",
            &self.first_failure().map(|result| result.spec().name()),
        )?;
        state.serialize_field("results", &self.results)?;
        state.end()
    }
}

/// A gate that finished `FAILED`, carrying the full report.
#[derive(Debug)]
pub struct GateFailure {
    report: GateReport,
}

impl GateFailure {
    pub fn report(&self) -> &GateReport {
        &self.report
    }

    pub fn into_report(self) -> GateReport {
        self.report
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &ProbeResult> {
        self.report.failures()
    }
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .unavailable()
            .map(|result| result.spec().name())
            .collect();
        write!(
            f,
            "{} dependency(ies) unavailable: {}",
            names.len(),
            names.join(", ")
        )
    }
}

impl std::error::Error for GateFailure {}

/// Runs a set of probes once and aggregates their outcomes.
///
/// `run` consumes the gate: build a new one for every check cycle.
pub struct Gate<P> {
    specs: Vec<ProbeSpec>,
    prober: P,
    mode: GateMode,
    shutdown: CancellationToken,
    state: GateState,
}

impl<P> Gate<P>
where
    P: Prober,
{
    pub fn new(specs: Vec<ProbeSpec>, prober: P) -> Self {
        Self {
            specs,
            prober,
            mode: GateMode::default(),
            shutdown: CancellationToken::new(),
            state: GateState::Pending,
        }
    }

    pub fn with_mode(mut self, mode: GateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn specs(&self) -> &[ProbeSpec] {
        &self.specs
    }

    pub async fn run(mut self) -> GateReport {
        let started = Instant::now();
        self.transition(GateState::Running);
        tracing::info!(
            mode = self.mode.as_str(),
            probes = self.specs.len(),
            "waiting for dependencies"
        );

        let (results, first_failure) = match self.mode {
            GateMode::Sequential => self.run_sequential().await,
            GateMode::Concurrent => self.run_concurrent().await,
        };

        let status = if first_failure.is_none() && results.len() == self.specs.len() {
            GateStatus::Ready
        } else {
            GateStatus::Failed
        };
        self.transition(match status {
            GateStatus::Ready => GateState::Ready,
            GateStatus::Failed => GateState::Failed,
        });

        let elapsed = started.elapsed();
        tracing::info!(
            status = status.as_str(),
            duration_ms = duration_millis(elapsed),
            "readiness gate finished"
        );

        GateReport {
            mode: self.mode,
            status,
            results,
            first_failure,
            elapsed,
        }
    }

    async fn run_sequential(&self) -> (Vec<ProbeResult>, Option<usize>) {
        let mut results = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let result = execute(spec, &self.prober, &self.shutdown).await;
            let reachable = result.is_reachable();
            results.push(result);
            if !reachable {
                let index = results.len() - 1;
                return (results, Some(index));
            }
        }
        (results, None)
    }

    async fn run_concurrent(&self) -> (Vec<ProbeResult>, Option<usize>) {
        let results = join_all(
            self.specs
                .iter()
                .map(|spec| execute(spec, &self.prober, &self.shutdown)),
        )
        .await;
        let first_failure = results.iter().position(|result| !result.is_reachable());
        (results, first_failure)
    }

    fn transition(&mut self, next: GateState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                state_from = self.state.as_str(),
                state_to = next.as_str(),
                "ignoring invalid readiness gate transition"
            );
            return;
        }
        tracing::info!(
            state_from = self.state.as_str(),
            state_to = next.as_str(),
            "readiness gate state changed"
        );
        self.state = next;
    }
}
