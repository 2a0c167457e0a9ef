//! Error type for the fallible edges of the crate (files, settings, field data).

/// Errors raised while loading, saving or validating thermal data.
///
/// Sampling and queries never fail; only I/O and validation surface errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ThermalError {
    /// Failed to read a file
    LoadFailed(String),
    /// Failed to parse file contents
    ParseFailed(String),
    /// Failed to serialize data
    SerializeFailed(String),
    /// Failed to write a file
    SaveFailed(String),
    /// Settings value outside its accepted range
    InvalidConfig(String),
    /// Field data violating its layout invariants
    InvalidField(String),
}

impl std::fmt::Display for ThermalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThermalError::LoadFailed(msg) => write!(f, "Failed to load: {msg}"),
            ThermalError::ParseFailed(msg) => write!(f, "Failed to parse: {msg}"),
            ThermalError::SerializeFailed(msg) => write!(f, "Failed to serialize: {msg}"),
            ThermalError::SaveFailed(msg) => write!(f, "Failed to save: {msg}"),
            ThermalError::InvalidConfig(msg) => write!(f, "Invalid settings: {msg}"),
            ThermalError::InvalidField(msg) => write!(f, "Invalid field data: {msg}"),
        }
    }
}

impl std::error::Error for ThermalError {}

/// Result alias used across the crate.
pub type ThermalResult<T> = Result<T, ThermalError>;
