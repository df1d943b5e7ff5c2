use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum VellumError {
    #[error("Corrupt database: {0}")]
    Corrupt(String),
    #[error("Out of memory")]
    NoMem,
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Conversion error: {0}")]
    ConversionError(String),
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Database or disk is full")]
    Full,
    #[error("Interrupted")]
    Interrupted,
    #[error("Database is locked")]
    Busy,
    #[error("Runtime error: {0}")]
    Constraint(String),
    #[error("Misuse: {0}")]
    Misuse(String),
}

impl VellumError {
    /// Errors that invalidate the whole connection transaction when they
    /// reach a halt, as opposed to errors recoverable by undoing only the
    /// failing statement.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VellumError::IOError(_) | VellumError::Interrupted | VellumError::Corrupt(_)
        )
    }
}

impl Clone for VellumError {
    fn clone(&self) -> Self {
        match self {
            VellumError::Corrupt(s) => VellumError::Corrupt(s.clone()),
            VellumError::NoMem => VellumError::NoMem,
            VellumError::InternalError(s) => VellumError::InternalError(s.clone()),
            VellumError::ConversionError(s) => VellumError::ConversionError(s.clone()),
            VellumError::IOError(e) => {
                VellumError::IOError(std::io::Error::new(e.kind(), e.to_string()))
            }
            VellumError::Full => VellumError::Full,
            VellumError::Interrupted => VellumError::Interrupted,
            VellumError::Busy => VellumError::Busy,
            VellumError::Constraint(s) => VellumError::Constraint(s.clone()),
            VellumError::Misuse(s) => VellumError::Misuse(s.clone()),
        }
    }
}

#[macro_export]
macro_rules! bail_corrupt_error {
    ($($arg:tt)*) => {
        return Err($crate::error::VellumError::Corrupt(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_constraint_error {
    ($($arg:tt)*) => {
        return Err($crate::error::VellumError::Constraint(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_misuse_error {
    ($($arg:tt)*) => {
        return Err($crate::error::VellumError::Misuse(format!($($arg)*)))
    };
}

pub const VELLUM_OK: usize = 0;
pub const VELLUM_CONSTRAINT: usize = 19;
pub const VELLUM_CONSTRAINT_PRIMARYKEY: usize = VELLUM_CONSTRAINT | (6 << 8);
pub const VELLUM_CONSTRAINT_NOTNULL: usize = VELLUM_CONSTRAINT | (5 << 8);
