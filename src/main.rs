#![allow(clippy::result_large_err)]

use anyhow::Context;
use readiness_gate::runtime::spawn_shutdown_watchers;
use readiness_gate::telemetry::LogOutput;
use readiness_gate::{
    telemetry, Gate, GateConfig, GateMode, NetworkProber, ProbeManifest, ProbeSpec,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

const EXIT_UNAVAILABLE: u8 = 1;
const EXIT_USAGE: u8 = 2;

struct RunOptions {
    manifest_path: Option<String>,
    mode: Option<GateMode>,
    json: bool,
    list_probes: bool,
}

impl RunOptions {
    /// `--json` owns stdout, so every log line moves to stderr.
    fn log_output(&self) -> LogOutput {
        if self.json {
            LogOutput::Stderr
        } else {
            LogOutput::Split
        }
    }
}

enum CliCommand {
    Run(RunOptions),
    Help,
}

#[tokio::main]
async fn main() -> ExitCode {
    let options = match parse_cli_args(std::env::args().skip(1)) {
        Ok(CliCommand::Run(options)) => options,
        Ok(CliCommand::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(err) = telemetry::init_tracing(options.log_output()) {
        eprintln!("ERROR: {err}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(options).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run(options: RunOptions) -> anyhow::Result<ExitCode> {
    let config = GateConfig::load().context("failed to load configuration")?;
    let specs = match options.manifest_path.as_deref() {
        Some(path) => ProbeManifest::from_path(path, &config.probe_defaults)
            .context("failed to load probe manifest")?
            .into_probes(),
        None => config.default_probes(),
    };

    if options.list_probes {
        print_probes(&specs);
        return Ok(ExitCode::SUCCESS);
    }

    let shutdown = CancellationToken::new();
    spawn_shutdown_watchers(shutdown.clone(), config.deadline);

    let prober = NetworkProber::new().context("failed to construct probes")?;
    let report = Gate::new(specs, prober)
        .with_mode(options.mode.unwrap_or(config.mode))
        .with_shutdown(shutdown.clone())
        .run()
        .await;
    shutdown.cancel();

    if options.json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to render gate report")?;
        println!("{rendered}");
    }

    match report.ensure_ready() {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(failure) => {
            for result in failure.unavailable() {
                eprintln!(
                    "ERROR: {} is unavailable at {}",
                    result.spec().name(),
                    result.spec().target()
                );
            }
            Ok(ExitCode::from(EXIT_UNAVAILABLE))
        }
    }
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut options = RunOptions {
        manifest_path: None,
        mode: None,
        json: false,
        list_probes: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if options.manifest_path.is_some() {
                    anyhow::bail!("probe manifest path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                options.manifest_path = Some(value);
            }
            "--concurrent" => set_mode(&mut options, GateMode::Concurrent)?,
            "--sequential" => set_mode(&mut options, GateMode::Sequential)?,
            "--json" => options.json = true,
            "--list-probes" => options.list_probes = true,
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run(options))
}

fn set_mode(options: &mut RunOptions, mode: GateMode) -> anyhow::Result<()> {
    match options.mode {
        Some(existing) if existing != mode => {
            anyhow::bail!("--concurrent and --sequential are mutually exclusive")
        }
        _ => {
            options.mode = Some(mode);
            Ok(())
        }
    }
}

fn print_probes(specs: &[ProbeSpec]) {
    for spec in specs {
        println!(
            "{}\t{}\t{}\tmax_attempts={}\tretry_delay={}\tattempt_timeout={}",
            spec.name(),
            spec.kind().as_str(),
            spec.target(),
            spec.max_attempts(),
            humantime::format_duration(spec.retry_delay()),
            humantime::format_duration(spec.attempt_timeout())
        );
    }
}

fn print_help() {
    println!(
        "\
Usage: readiness-gate [OPTIONS]

Blocks until ClickHouse, MinIO and RabbitMQ (or the probes of a manifest) answer.
Exits 0 when every dependency is reachable, 1 when one is not, 2 on usage errors.

Options:
  -c, --config <PATH>    Probe manifest (YAML) replacing the default probe set
      --concurrent       Run probes concurrently (overrides GATE_MODE)
      --sequential       Run probes one at a time in declaration order
      --json             Print the final report as JSON on stdout
      --list-probes      Print the resolved probes and exit
  -h, --help             Print this help message

Environment:
  CLICKHOUSE_HEALTH_URL  default http://clickhouse:8123/ping
  MINIO_HEALTH_URL       default http://minio:9000/minio/health/live
  RABBITMQ_HOST          default rabbitmq
  RABBITMQ_PORT          default 5672
  GATE_MAX_ATTEMPTS      default 30
  GATE_RETRY_DELAY       default 2s
  GATE_ATTEMPT_TIMEOUT   default 5s
  GATE_MODE              sequential | concurrent
  GATE_DEADLINE          optional overall deadline, e.g. 5m
"
    );
}
