//! Error types shared by the fieldreport crates.

use miette::Diagnostic;

/// Main error type for calls that leave the composer: HTTP, config, IO.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum FieldReportError {
    /// Transport-level HTTP failure (connect, timeout, body decode)
    #[error(transparent)]
    #[diagnostic(code(fieldreport::http))]
    Http(#[from] reqwest::Error),

    /// The server answered, but not with success
    #[error("server responded with {status}: {body}")]
    #[diagnostic(code(fieldreport::status))]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// No token was available to attribute the call to a user
    #[error("not authenticated")]
    #[diagnostic(
        code(fieldreport::auth),
        help("sign in again, or export the variable named by `api.token_env`")
    )]
    NotAuthenticated,

    /// Directory lookup miss
    #[error("not found: {0}")]
    #[diagnostic(code(fieldreport::not_found))]
    NotFound(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    #[diagnostic(code(fieldreport::config))]
    Config(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error(transparent)]
    #[diagnostic_source]
    Serde(#[from] SerDeError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(fieldreport::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(fieldreport::toml))]
    Toml(#[from] toml::de::Error),
}

impl From<serde_json::Error> for FieldReportError {
    fn from(err: serde_json::Error) -> Self {
        FieldReportError::Serde(SerDeError::Json(err))
    }
}

impl From<toml::de::Error> for FieldReportError {
    fn from(err: toml::de::Error) -> Self {
        FieldReportError::Serde(SerDeError::Toml(err))
    }
}

impl FieldReportError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FieldReportError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FieldReportError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let unavailable = FieldReportError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(unavailable.is_transient());

        let rejected = FieldReportError::Status {
            status: reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            body: "bad date".into(),
        };
        assert!(!rejected.is_transient());
        assert!(!FieldReportError::NotAuthenticated.is_transient());
        assert!(!FieldReportError::NotFound("S-9".into()).is_transient());
    }
}
