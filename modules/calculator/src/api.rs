//! Calculator capability contracts and types.
//!
//! The calculator module injects one [`Addition`] and one [`Subtraction`]
//! provider, tracks any number of [`ExtendedOperation`] providers, and
//! exposes [`Calculator`] while everything required is bound.

/// Required addition capability.
pub trait Addition: Send + Sync {
    fn add(&self, a: i64, b: i64) -> i64;
}

/// Required subtraction capability.
pub trait Subtraction: Send + Sync {
    fn subtract(&self, a: i64, b: i64) -> i64;
}

/// Optional extra operation, selected by its symbol (e.g. `mul`, `div`).
pub trait ExtendedOperation: Send + Sync {
    fn symbol(&self) -> &str;

    /// # Errors
    /// Operation-specific arithmetic failures (e.g. division by zero).
    fn apply(&self, a: i64, b: i64) -> Result<i64, CalculatorError>;
}

/// The capability the calculator module itself exposes.
pub trait Calculator: Send + Sync {
    /// Evaluate `operation` over two operands.
    ///
    /// # Errors
    /// `Unavailable` when the named operation has no bound provider right
    /// now; arithmetic errors from the provider otherwise.
    fn evaluate(&self, operation: &str, a: i64, b: i64) -> Result<i64, CalculatorError>;
}

/// Error type for calculator operations.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CalculatorError {
    #[error("operation '{operation}' is not available")]
    Unavailable { operation: String },

    #[error("division by zero")]
    DivisionByZero,
}
