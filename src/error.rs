//! Pipeline-level error taxonomy.
//!
//! Adapter failures (`SourceError`) are absorbed at the source boundary and never
//! reach this type; what remains are the errors that end a run early.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Malformed transaction hash or unsupported chain. Raised before any I/O.
    #[error("invalid input: {0}")]
    Input(String),

    /// The ledger could not deliver the transaction or its receipt.
    #[error("mandatory fetch failed: {0}")]
    MandatoryFetch(String),

    /// The text-generation collaborator failed while drafting.
    #[error("narrative generation failed: {0}")]
    Narrative(String),
}

impl AnalysisError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn mandatory_fetch(message: impl Into<String>) -> Self {
        Self::MandatoryFetch(message.into())
    }

    pub fn narrative(message: impl Into<String>) -> Self {
        Self::Narrative(message.into())
    }

    /// Stable code carried in `technicalDetails.error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Input(_) => "input_error",
            Self::MandatoryFetch(_) => "mandatory_fetch_error",
            Self::Narrative(_) => "narrative_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Input(m) | Self::MandatoryFetch(m) | Self::Narrative(m) => m,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.message().to_string(),
        }
    }
}

/// Serialized form of a fatal error inside a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
