/// Catch-all error type, an alias for `anyhow::Error`.
///
/// Used where errors of arbitrary concrete types are aggregated, typically
/// during configuration validation.
pub type AnyError = anyhow::Error;

/// A `Result` whose error type defaults to [`AnyError`].
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;

#[macro_export]
macro_rules! bail_into {
    ($msg:literal $(,)?) => {
        return Err(::anyhow::anyhow!($msg).into())
    };
    ($err:expr $(,)?) => {
        return Err(::anyhow::anyhow!($err).into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(::anyhow::anyhow!($fmt, $($arg)*).into())
    };
}
