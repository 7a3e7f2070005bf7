//! Error types for the merge gate.

use std::time::Duration;

use thiserror::Error;

/// Gate error type.
///
/// Only [`Error::InvalidSettingValue`] and [`Error::InvalidScope`] are meant to
/// reach a caller; everything else is absorbed by the hook boundary in
/// [`crate::eval::DecisionEngine::evaluate`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("settings store unavailable: {0}")]
    SettingsStoreUnavailable(String),

    #[error("invalid setting value '{0}': expected one of true, false, INHERIT")]
    InvalidSettingValue(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("changeset listing failed: {0}")]
    Changeset(String),

    #[error("scan exceeded its time budget of {0:?}")]
    BudgetExceeded(Duration),

    #[error("unexpected internal fault: {0}")]
    UnexpectedInternalFault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
