//! Signals delivered on a subscription

use super::error::FluxError;
use std::fmt;

/// One event on a subscription
///
/// A subscription sees zero or more `Next` signals followed by at most one
/// terminal signal (`Complete` or `Error`).
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// A value
    Next(T),
    /// Normal termination
    Complete,
    /// Failed termination
    Error(FluxError),
}

impl<T> Signal<T> {
    /// `Complete` or `Error`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }

    /// Borrow the value of a `Next` signal
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Next(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(value) => write!(f, "next({value:?})"),
            Self::Complete => f.write_str("complete"),
            Self::Error(error) => write!(f, "error({error})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::Next(3).to_string(), "next(3)");
        assert_eq!(Signal::<i32>::Complete.to_string(), "complete");
        assert!(Signal::<i32>::Error(FluxError::msg("bad"))
            .to_string()
            .starts_with("error("));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!Signal::Next(1).is_terminal());
        assert!(Signal::<i32>::Complete.is_terminal());
        assert_eq!(Signal::Next(5).value(), Some(&5));
    }
}
