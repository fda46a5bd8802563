use thiserror::Error;

/// Authentication/authorization failure as seen by callers.
///
/// Every rejected credential maps to `InvalidCredential`; the specific reason
/// only goes to the audit log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing api key")]
    MissingCredential,

    #[error("invalid api key")]
    InvalidCredential,

    #[error("insufficient scope: '{required}' is required")]
    InsufficientScope { required: String },

    #[error("unknown scope '{0}'")]
    InvalidScope(String),

    #[error("credential store error: {0}")]
    Store(String),
}
