#[path = "../support/mod.rs"]
mod support;

use proptest::prelude::*;
use readiness_gate::probe::{execute, ProbeOutcome};
use std::time::Duration;
use support::{capture_logs, http_spec, tcp_spec, Script, ScriptedProber};
use tokio_util::sync::CancellationToken;

const DELAY: Duration = Duration::from_secs(2);

#[tokio::test(start_paused = true)]
async fn never_reachable_exhausts_every_attempt() {
    let prober = ScriptedProber::new().script("RabbitMQ", Script::Never);
    let spec = tcp_spec("RabbitMQ", 4, DELAY);

    let result = execute(&spec, &prober, &CancellationToken::new()).await;

    assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
    assert_eq!(result.attempts_used(), 4);
    assert_eq!(prober.attempts_for("RabbitMQ"), 4);
    assert!(
        result.elapsed() >= DELAY * 3,
        "elapsed {:?} should cover three retry delays",
        result.elapsed()
    );
    assert!(result
        .last_error()
        .expect("last error recorded")
        .contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn reachable_on_third_attempt_reports_three_attempts() {
    let prober = ScriptedProber::new().script("ClickHouse", Script::ReachableOnAttempt(3));
    let spec = http_spec("ClickHouse", 5, DELAY);

    let result = execute(&spec, &prober, &CancellationToken::new()).await;

    assert_eq!(result.outcome(), ProbeOutcome::Reachable);
    assert_eq!(result.attempts_used(), 3);
    assert!(result.elapsed() >= DELAY * 2);
    assert_eq!(prober.attempts_for("ClickHouse"), 3);
}

#[tokio::test(start_paused = true)]
async fn single_attempt_budget_skips_retry_delay() {
    let prober = ScriptedProber::new().script("MinIO", Script::Never);
    let spec = http_spec("MinIO", 1, Duration::from_secs(60));

    let result = execute(&spec, &prober, &CancellationToken::new()).await;

    assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
    assert_eq!(result.attempts_used(), 1);
    assert!(
        result.elapsed() < Duration::from_secs(60),
        "no retry delay should be incurred: {:?}",
        result.elapsed()
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_attempt_is_bounded_by_attempt_timeout() {
    let prober = ScriptedProber::new().script("MinIO", Script::Hang);
    let spec = http_spec("MinIO", 2, Duration::from_secs(1))
        .with_attempt_timeout(Duration::from_secs(3));

    let result = execute(&spec, &prober, &CancellationToken::new()).await;

    assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
    assert_eq!(result.attempts_used(), 2);
    assert!(result.elapsed() >= Duration::from_secs(7));
    assert!(result
        .last_error()
        .expect("last error recorded")
        .contains("attempt timed out after 3s"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_retry_delay_stops_the_probe() {
    let prober = ScriptedProber::new().script("RabbitMQ", Script::Never);
    let spec = tcp_spec("RabbitMQ", 30, DELAY);
    let shutdown = CancellationToken::new();

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        canceller.cancel();
    });

    let result = execute(&spec, &prober, &shutdown).await;

    assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
    assert_eq!(result.attempts_used(), 2, "attempts at t=0s and t=2s only");
    assert!(result.elapsed() < DELAY * 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_makes_no_attempt() {
    let prober = ScriptedProber::new().script("ClickHouse", Script::Always);
    let spec = http_spec("ClickHouse", 30, DELAY);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = execute(&spec, &prober, &shutdown).await;

    assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
    assert_eq!(result.attempts_used(), 0);
    assert!(prober.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn every_attempt_emits_one_progress_line() {
    let (logs, _guard) = capture_logs();
    let prober = ScriptedProber::new().script("MinIO", Script::ReachableOnAttempt(3));
    let spec = http_spec("MinIO", 5, DELAY);

    let result = execute(&spec, &prober, &CancellationToken::new()).await;
    assert_eq!(result.outcome(), ProbeOutcome::Reachable);

    let output = logs.contents();
    let waiting = output
        .lines()
        .filter(|line| line.contains("waiting for MinIO"))
        .count();
    let reachable = output
        .lines()
        .filter(|line| line.contains("MinIO is reachable"))
        .count();
    assert_eq!(waiting, 2, "logs: {output}");
    assert_eq!(reachable, 1, "logs: {output}");
    assert!(output.contains("probe=MinIO"), "logs: {output}");
    assert!(
        output.contains("endpoint=http://minio.internal:8123/ping"),
        "logs: {output}"
    );
    assert!(output.contains("attempt=2 "), "logs: {output}");
    assert!(output.contains("max_attempts=5"), "logs: {output}");
    assert!(
        output.contains("reason=\"connection refused\""),
        "logs: {output}"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_probe_logs_unavailable_error() {
    let (logs, _guard) = capture_logs();
    let prober = ScriptedProber::new().script("RabbitMQ", Script::Never);
    let spec = tcp_spec("RabbitMQ", 2, Duration::from_millis(10));

    execute(&spec, &prober, &CancellationToken::new()).await;

    let output = logs.contents();
    let line = output
        .lines()
        .find(|line| line.contains("RabbitMQ is unavailable"))
        .unwrap_or_else(|| panic!("missing unavailable line: {output}"));
    assert!(line.starts_with("ERROR"), "line: {line}");
    assert!(line.contains("attempts=2"), "line: {line}");
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn attempts_never_exceed_budget(max_attempts in 1u32..12, reachable_on in 1u32..16, delay_ms in 0u64..5_000) {
        let runtime = paused_runtime();
        let delay = Duration::from_millis(delay_ms);
        let result = runtime.block_on(async {
            let prober = ScriptedProber::new()
                .script("dep", Script::ReachableOnAttempt(reachable_on));
            let spec = tcp_spec("dep", max_attempts, delay);
            execute(&spec, &prober, &CancellationToken::new()).await
        });

        prop_assert!(result.attempts_used() <= max_attempts);
        if reachable_on <= max_attempts {
            prop_assert_eq!(result.outcome(), ProbeOutcome::Reachable);
            prop_assert_eq!(result.attempts_used(), reachable_on);
        } else {
            prop_assert_eq!(result.outcome(), ProbeOutcome::TimedOut);
            prop_assert_eq!(result.attempts_used(), max_attempts);
            prop_assert!(result.elapsed() >= delay * (max_attempts - 1));
        }
    }
}
