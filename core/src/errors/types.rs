//! Error types for authentication and token management
//!
//! Every credential failure maps to a response that names only the error
//! kind, so a caller cannot learn which part of a credential was wrong.

use courier_shared::errors::{error_codes, ErrorResponse, IntoErrorResponse};
use thiserror::Error;

/// Authentication-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
}

/// Token-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token is past its validity window
    #[error("Token expired")]
    Expired,

    /// Signature, structure, issuer, audience or kind is invalid
    #[error("Malformed token")]
    Malformed,

    /// The refresh token is not the active one for the claimed subject
    #[error("Refresh token does not match the subject's session")]
    SubjectMismatch,

    #[error("Token signing failed")]
    SigningFailed,
}

impl IntoErrorResponse for TokenError {
    fn to_error_response(&self) -> ErrorResponse {
        match self {
            TokenError::Expired => {
                ErrorResponse::new(error_codes::TOKEN_EXPIRED, "Invalid or expired token")
            }
            TokenError::Malformed | TokenError::SubjectMismatch => {
                ErrorResponse::new(error_codes::TOKEN_INVALID, "Invalid or expired token")
            }
            TokenError::SigningFailed => {
                ErrorResponse::new(error_codes::INTERNAL_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoErrorResponse for AuthError {
    fn to_error_response(&self) -> ErrorResponse {
        match self {
            AuthError::InvalidCredentials => {
                ErrorResponse::new(error_codes::UNAUTHORIZED, "Invalid username or password")
            }
        }
    }
}
