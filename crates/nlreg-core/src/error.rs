//! Error types for nlreg

use thiserror::Error;

/// Result type alias using nlreg's Error
pub type Result<T> = std::result::Result<T, Error>;

/// nlreg error types
///
/// The reconciliation engine raises typed failures and never silently drops
/// a claim; the ingestion loop is the only layer that decides retry-vs-skip.
#[derive(Error, Debug)]
pub enum Error {
    // Identity errors (E001-E099)
    #[error("Identifier '{0}' does not resolve in the identity registry")]
    UnknownIdentity(String),

    #[error("Identifier '{0}' resolves but is inactive where an active identity is required")]
    InactiveIdentity(String),

    // Claim errors (E100-E199)
    #[error("Malformed claim: {0}")]
    MalformedClaim(String),

    // Infrastructure errors (E200-E299)
    #[error("Relationship store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Identity registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Config errors (E300-E399)
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownIdentity(_) => "E001",
            Self::InactiveIdentity(_) => "E002",
            Self::MalformedClaim(_) => "E100",
            Self::StoreUnavailable(_) => "E200",
            Self::RegistryUnavailable(_) => "E201",
            Self::Database(_) => "E202",
            Self::Network(_) => "E203",
            Self::Config(_) => "E300",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether re-processing the same input later can succeed.
    ///
    /// Identity errors count as transient: the registry is eventually
    /// consistent and the upstream condition is expected to resolve.
    /// A malformed claim never makes progress no matter how often it is
    /// retried; the ingestion loop's skip policy exists for that case.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UnknownIdentity(_)
            | Self::InactiveIdentity(_)
            | Self::StoreUnavailable(_)
            | Self::RegistryUnavailable(_)
            | Self::Database(_)
            | Self::Network(_)
            | Self::Io(_) => true,
            Self::MalformedClaim(_) | Self::Config(_) | Self::Other(_) => false,
        }
    }

    /// Whether the ingestion loop may commit past this failure under the
    /// skip policy.
    ///
    /// Malformed claims and unknown identifiers are the poison-message
    /// cases: an identifier that never enters the registry would hold the
    /// stream forever. An inactive identity resolves, so the condition is a
    /// real conflict and the record is retried under either policy, as are
    /// infrastructure failures.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::MalformedClaim(_) | Self::UnknownIdentity(_))
    }
}
