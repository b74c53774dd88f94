use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::fmt::{self as stdfmt};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "readiness_gate=info,info";

/// Where log lines go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// Progress on stdout, warnings and errors on stderr.
    #[default]
    Split,
    /// Everything on stderr, leaving stdout to the report.
    Stderr,
}

/// Installs the global subscriber writing to the process streams.
pub fn init_tracing(output: LogOutput) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(OperatorLineFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(operator_writer(output, std::io::stdout, std::io::stderr))
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// WARN and ERROR always reach `stderr`; INFO and below reach `stdout` unless
/// `output` sends everything to `stderr`.
pub fn operator_writer<O, E>(output: LogOutput, stdout: O, stderr: E) -> BoxMakeWriter
where
    O: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    E: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match output {
        LogOutput::Split => {
            BoxMakeWriter::new(stderr.with_max_level(tracing::Level::WARN).or_else(stdout))
        }
        LogOutput::Stderr => BoxMakeWriter::new(stderr),
    }
}

/// `<ts> <LEVEL> <message> key=value ...`, one line per event, fields sorted by key.
///
/// Meant for people tailing container start-up logs, so the message comes first and
/// source locations are left out.
#[derive(Clone, Copy, Debug, Default)]
pub struct OperatorLineFormatter {
    with_timestamp: bool,
}

impl OperatorLineFormatter {
    pub const fn new() -> Self {
        Self {
            with_timestamp: true,
        }
    }

    pub const fn without_timestamp(mut self) -> Self {
        self.with_timestamp = false;
        self
    }
}

impl<S, N> FormatEvent<S, N> for OperatorLineFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let mut line = String::new();
        if self.with_timestamp {
            line.push_str(&Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
            line.push(' ');
        }
        line.push_str(&format!("{:<5} ", metadata.level().as_str()));
        line.push_str(&message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '='));

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    buffer.push(' ');
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
