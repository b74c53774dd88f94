#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    Validation(#[from] crate::config::ValidationError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Why a single probe attempt did not succeed.
///
/// Retried locally; only surfaced to operators through per-attempt log lines and
/// the `last_error` of a timed-out [`crate::probe::ProbeResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("{target} unreachable over HTTP: {reason}")]
    UnreachableHttp { target: String, reason: String },
    #[error("{target} unreachable over TCP: {reason}")]
    UnreachableTcp { target: String, reason: String },
}

impl ProbeError {
    pub fn http(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreachableHttp {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn tcp(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreachableTcp {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ProbeError::UnreachableHttp { reason, .. } | ProbeError::UnreachableTcp { reason, .. } => {
                reason
            }
        }
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
}
