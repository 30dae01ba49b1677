use std::error::Error;
use std::fmt;

/// Wraps an error so its full `source()` chain is rendered on one line.
///
/// `tracing`'s `%err` capture only prints `Display` for the outermost error,
/// which for a nested `thiserror` enum often hides the interesting part.
/// Wrap with `LogError` wherever a cause chain should be logged in full:
///
/// ```ignore
/// tracing::error!(error = %LogError(&err), "authentication failed");
/// ```
pub struct LogError<'a, E: ?Sized>(pub &'a E);

impl<'a, E> fmt::Display for LogError<'a, E>
where
    E: Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {}", cause)?;
            source = cause.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn chains_causes() {
        let err = Outer(Inner);
        assert_eq!(LogError(&err).to_string(), "outer failure: inner failure");
    }
}
