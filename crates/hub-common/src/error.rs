//! Error taxonomy for the gateway
//!
//! Every boundary function returns [`Error`]; the HTTP layer translates the
//! variant into a status code and a `{"code", "message"}` envelope. The
//! `Display` output of each variant is exactly the message shown to callers.

use serde::{Deserialize, Serialize};

/// Result alias used across the gateway crates
pub type Result<T> = std::result::Result<T, Error>;

/// A resource operation the acting identity may not perform.
///
/// Serialized verbatim into the body of a 403 response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenAction {
    /// API group of the resource (empty for the core group)
    pub api_group: String,
    /// Plural resource name, e.g. `deployments`
    pub resource: String,
    /// Target namespace, empty for cluster-scoped resources
    pub namespace: String,
    /// Whether the resource is cluster scoped
    pub cluster_wide: bool,
    /// Verbs that were denied
    pub verbs: Vec<String>,
}

/// Gateway error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Missing or invalid credential (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Authorization rejected (403), optionally with the denied actions
    #[error("{message}")]
    Forbidden {
        /// Client-visible message
        message: String,
        /// Denied actions when the rejection came from manifest gating
        actions: Vec<ForbiddenAction>,
    },

    /// Missing release, secret or resource (404)
    #[error("{0}")]
    NotFound(String),

    /// Duplicate or still-referenced resource (409)
    #[error("{0}")]
    Conflict(String),

    /// Valid request the installer could not execute (422)
    #[error("{0}")]
    UnprocessableEntity(String),

    /// Upstream cluster could not be reached or answered garbage (502)
    #[error("{0}")]
    BadGateway(String),

    /// Upstream dial failed (503)
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Everything else (500)
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a forbidden error without an action list
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden {
            message: msg.into(),
            actions: Vec::new(),
        }
    }

    /// Create a forbidden error listing the denied actions.
    ///
    /// The message is the JSON array of actions so clients can render it.
    pub fn forbidden_actions(actions: Vec<ForbiddenAction>) -> Self {
        let message = serde_json::to_string(&actions).unwrap_or_default();
        Error::Forbidden { message, actions }
    }

    /// Numeric HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden { .. } => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::UnprocessableEntity(_) => 422,
            Error::BadGateway(_) => 502,
            Error::ServiceUnavailable(_) => 503,
            Error::Internal(_) => 500,
        }
    }
}

/// Translate installer error text into the taxonomy.
///
/// The installer exposes no typed errors, so the message is matched
/// case-insensitively against these substrings, first match wins:
///
/// | Text | Error |
/// |---|---|
/// | `is still in use`, `already exists` | [`Error::Conflict`] |
/// | `not found` | [`Error::NotFound`] |
/// | `unauthorized` | [`Error::Forbidden`] |
/// | `release` followed later on the same line by `failed` | [`Error::UnprocessableEntity`] |
///
/// Anything else is wrapped with `default`.
pub fn classify_installer_error(message: impl Into<String>, default: fn(String) -> Error) -> Error {
    let message = message.into();
    let lower = message.to_lowercase();

    if lower.contains("is still in use") || lower.contains("already exists") {
        Error::Conflict(message)
    } else if lower.contains("not found") {
        Error::NotFound(message)
    } else if lower.contains("unauthorized") {
        Error::forbidden(message)
    } else if release_failed(&lower) {
        Error::UnprocessableEntity(message)
    } else {
        default(message)
    }
}

fn release_failed(lower: &str) -> bool {
    lower.lines().any(|line| {
        line.find("release")
            .is_some_and(|idx| line[idx + "release".len()..].contains("failed"))
    })
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(status) => match status.code {
                400 => Error::BadRequest(status.message),
                401 => Error::Unauthorized(status.message),
                403 => Error::forbidden(status.message),
                404 => Error::NotFound(status.message),
                409 => Error::Conflict(status.message),
                422 => Error::UnprocessableEntity(status.message),
                _ => Error::Internal(status.message),
            },
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization error: {}", e))
    }
}
