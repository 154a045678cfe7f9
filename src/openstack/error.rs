//! Errors raised by the remote API surface.

use thiserror::Error;

/// Failures reported by a [`super::ComputeApi`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The requested resource does not exist (HTTP 404).
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind (`server`, `flavor`, `image`, `network`).
        resource: String,
        /// Identifier that was looked up.
        id: String,
    },
    /// The API answered with a non-success status.
    #[error("{operation} failed with HTTP {status}: {message}")]
    Http {
        /// Operation being performed.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The request never produced a response.
    #[error("{operation} failed: {message}")]
    Transport {
        /// Operation being performed.
        operation: String,
        /// Transport error description.
        message: String,
    },
    /// The response body could not be decoded.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation being performed.
        operation: String,
        /// Decoder error description.
        message: String,
    },
    /// The cloud created a server but the call still failed.
    #[error("server {id} was created but the request failed: {message}")]
    Incomplete {
        /// Identifier of the partially created server.
        id: String,
        /// Failure description.
        message: String,
    },
    /// Authentication or service discovery failed.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ApiError {
    /// Builds a [`ApiError::NotFound`].
    #[must_use]
    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::NotFound {
            resource: resource.to_owned(),
            id: id.to_owned(),
        }
    }

    /// Returns true for a 404 from the remote side.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Identifier of a server left behind by a failed create, if any.
    #[must_use]
    pub fn partial_resource_id(&self) -> Option<&str> {
        match self {
            Self::Incomplete { id, .. } if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}
