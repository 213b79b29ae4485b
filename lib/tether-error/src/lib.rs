//! Error primitives shared across Tether crates.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{any::Any, fmt::Display};

/// An opaque, type-erased error.
///
/// Used wherever a failure originates in user code (task initialization, polling, message processing) and the runtime
/// only needs to carry it, log it, or hand it to a callback.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (in the same order as `std::format!`), or any value that
/// implements `Debug` and `Display`. When given a value implementing `std::error::Error`, that value's source chain is
/// preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

// Named differently from `anyhow::Context` so it can sit next to `snafu::ResultExt` without method clashes.
/// Extension methods for attaching context to fallible results.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error value with additional context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error value with additional context that is only evaluated once an error occurs.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, context: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, context)
    }
}

/// Renders a panic payload, as returned by `catch_unwind`, into a human-readable message.
///
/// Payloads raised via `panic!` carry either a `&'static str` or a `String`. Anything else is reported generically.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Converts a panic payload into a [`GenericError`].
pub fn panic_to_error(payload: Box<dyn Any + Send>) -> GenericError {
    generic_error!("panicked: {}", panic_message(payload.as_ref()))
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use super::*;

    #[test]
    fn panic_message_static_str() {
        let payload = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn panic_message_formatted() {
        let payload = catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 42");
    }

    #[test]
    fn panic_message_opaque_payload() {
        let payload = catch_unwind(|| std::panic::panic_any(7_u32)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn error_context_wraps() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk"));
        let err = result.error_context("Failed to read state.").unwrap_err();
        assert_eq!(err.to_string(), "Failed to read state.");
        assert_eq!(err.root_cause().to_string(), "disk");
    }
}
