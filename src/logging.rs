//! Helper macros enforcing consistent probe log fields.
//!
//! These macros keep `probe` and `endpoint` fields present on every progress line emitted
//! while a dependency is being polled so operators can grep container logs by dependency.

/// Log an event for a probe/endpoint pair plus any extra fields.
#[macro_export]
macro_rules! probe_event {
    ($level:ident, $message:expr, probe = $probe:expr, endpoint = $endpoint:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            probe = %$probe,
            endpoint = %$endpoint,
            $($field = %$value,)*
            "{}",
            $message
        )
    };
}
