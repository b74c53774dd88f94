use readiness_gate::error::Error;
use readiness_gate::{ProbeDefaults, ProbeKind, ProbeManifest, ProbeTarget};
use std::io::Write;
use std::time::Duration;

fn parse(yaml: &str) -> readiness_gate::error::Result<ProbeManifest> {
    ProbeManifest::from_reader(yaml.as_bytes(), &ProbeDefaults::default())
}

fn validation_errors(err: Error) -> Vec<String> {
    match err {
        Error::Validation(validation) => validation.errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn manifest_defaults_apply_to_probes_without_overrides() {
    let manifest = parse(
        r#"
defaults:
  max_attempts: 10
  retry_delay: 1s
probes:
  - name: ClickHouse
    http: http://clickhouse:8123/ping
  - name: Postgres
    tcp: postgres:5432
    max_attempts: 60
    retry_delay: 500ms
    attempt_timeout: 2s
  - name: Loopback6
    tcp: "[::1]:6379"
"#,
    )
    .expect("valid manifest");

    let probes = manifest.probes();
    assert_eq!(probes.len(), 3);

    assert_eq!(probes[0].name(), "ClickHouse");
    assert_eq!(probes[0].kind(), ProbeKind::Http);
    assert_eq!(probes[0].max_attempts(), 10);
    assert_eq!(probes[0].retry_delay(), Duration::from_secs(1));
    assert_eq!(probes[0].attempt_timeout(), Duration::from_secs(5));

    assert_eq!(probes[1].max_attempts(), 60);
    assert_eq!(probes[1].retry_delay(), Duration::from_millis(500));
    assert_eq!(probes[1].attempt_timeout(), Duration::from_secs(2));
    assert_eq!(
        probes[1].target(),
        &ProbeTarget::Tcp {
            host: "postgres".to_string(),
            port: 5432,
        }
    );

    assert_eq!(
        probes[2].target(),
        &ProbeTarget::Tcp {
            host: "::1".to_string(),
            port: 6379,
        }
    );
    assert_eq!(probes[2].target().to_string(), "[::1]:6379");
}

#[test]
fn process_defaults_fill_missing_manifest_defaults() {
    let defaults = ProbeDefaults {
        max_attempts: 3,
        retry_delay: Duration::from_millis(250),
        attempt_timeout: Duration::from_secs(1),
    };
    let manifest = ProbeManifest::from_reader(
        "probes:\n  - name: MinIO\n    http: http://minio:9000/minio/health/live\n".as_bytes(),
        &defaults,
    )
    .expect("valid manifest");

    let probe = &manifest.into_probes()[0];
    assert_eq!(probe.max_attempts(), 3);
    assert_eq!(probe.retry_delay(), Duration::from_millis(250));
    assert_eq!(probe.attempt_timeout(), Duration::from_secs(1));
}

#[test]
fn every_probe_problem_is_reported_together() {
    let err = parse(
        r#"
defaults:
  retry_delay: whenever
probes:
  - name: ClickHouse
    http: ftp://clickhouse/ping
  - name: ClickHouse
    tcp: clickhouse:9000
  - name: ""
    tcp: rabbitmq:5672
  - name: Both
    http: http://both/ping
    tcp: both:1
  - name: Neither
  - name: BadPort
    tcp: rabbitmq:0
  - name: NoAttempts
    tcp: rabbitmq:5672
    max_attempts: 0
  - name: NoTimeout
    tcp: rabbitmq:5672
    attempt_timeout: 0s
"#,
    )
    .expect_err("invalid manifest");

    let errors = validation_errors(err);
    let expected = [
        "defaults.retry_delay",
        "probes[0] (ClickHouse): http",
        "probes[1] (ClickHouse): duplicate probe name `ClickHouse`",
        "probes[2]: name must not be empty",
        "probes[3] (Both): set exactly one of `http` or `tcp`",
        "probes[4] (Neither): one of `http` or `tcp` is required",
        "probes[5] (BadPort): tcp",
        "probes[6] (NoAttempts): max_attempts must be at least 1",
        "probes[7] (NoTimeout): attempt_timeout must be greater than zero",
    ];
    for prefix in expected {
        assert!(
            errors.iter().any(|error| error.starts_with(prefix)),
            "missing `{prefix}` in {errors:#?}"
        );
    }
    assert_eq!(errors.len(), expected.len(), "{errors:#?}");
}

#[test]
fn empty_manifest_is_rejected() {
    let errors = validation_errors(parse("probes: []\n").expect_err("no probes"));
    assert_eq!(errors, ["probes: at least one probe must be declared"]);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = parse(
        r#"
probes:
  - name: ClickHouse
    http: http://clickhouse:8123/ping
    retries: 5
"#,
    )
    .expect_err("unknown field");

    assert!(matches!(err, Error::Context { .. }), "{err:?}");
    assert!(err.to_string().contains("not a valid probe manifest"));
}

#[test]
fn manifest_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "probes:\n  - name: RabbitMQ\n    tcp: rabbitmq:5672\n    max_attempts: 4"
    )
    .expect("write manifest");

    let manifest =
        ProbeManifest::from_path(file.path(), &ProbeDefaults::default()).expect("manifest");
    assert_eq!(manifest.probes()[0].name(), "RabbitMQ");
    assert_eq!(manifest.probes()[0].max_attempts(), 4);

    let missing = ProbeManifest::from_path(
        file.path().with_extension("missing"),
        &ProbeDefaults::default(),
    )
    .expect_err("missing file");
    assert!(missing.to_string().contains("failed to read probe manifest"));
}
