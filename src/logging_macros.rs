#![warn(clippy::all, rust_2018_idioms)]

/// Debug-level tracing macro that prefixes each event with `[file:module:line]`.
///
/// Used for step-by-step progress through the login flow, where the source
/// location is more useful than the target alone.
#[macro_export]
macro_rules! trace_debug {
    ($($arg:tt)*) => {
        tracing::debug!("[{}:{}:{}] {}", file!(), module_path!(), line!(), format!($($arg)*));
    };
}
