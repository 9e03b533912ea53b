//! # Error Handling
//!
//! Error types for CloudChat Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── SessionClosed         - Session task has stopped              │
//! │  │   └── Cancelled             - Request cancelled by shutdown         │
//! │  │                                                                      │
//! │  ├── Input Errors                                                      │
//! │  │   ├── EmptyMessage          - Neither text nor image to send        │
//! │  │   ├── EmptySearchQuery      - Nothing to search for                 │
//! │  │   ├── NoPeerSelected        - No conversation is open               │
//! │  │   └── InvalidKey            - Not a valid store key                 │
//! │  │                                                                      │
//! │  ├── Store Errors                                                      │
//! │  │   ├── StoreUnavailable      - Network / service unavailable         │
//! │  │   ├── Timeout               - Request did not complete in time      │
//! │  │   ├── PermissionDenied      - Rejected by database rules            │
//! │  │   └── RequestFailed         - Other non-success response            │
//! │  │                                                                      │
//! │  ├── Directory Errors                                                  │
//! │  │   ├── UserNotFound          - Search miss / unknown user            │
//! │  │   ├── CannotAddSelf         - Friend target is the current user     │
//! │  │   └── NotFriends            - No friendship edge to remove          │
//! │  │                                                                      │
//! │  ├── Message Errors                                                    │
//! │  │   ├── MessageNotFound       - Message doesn't exist                 │
//! │  │   └── NotMessageOwner       - Delete of someone else's message      │
//! │  │                                                                      │
//! │  ├── Attachment Errors                                                 │
//! │  │   ├── UnsupportedImageType  - MIME type not accepted                │
//! │  │   ├── ImageTooLarge         - Over the configured size limit        │
//! │  │   ├── EmptyImage            - Attachment has no bytes               │
//! │  │   └── UploadFailed          - Object storage rejected the upload    │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── Serialization         - JSON encode / decode failures         │
//! │      └── InvalidConfig         - Missing or malformed settings         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every error also maps onto a coarse [`ErrorKind`], which is what the chat
//! session reports to the user as a non-blocking notice.

use thiserror::Error;

/// Result type alias for CloudChat Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CloudChat Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors (100-199)
    // ========================================================================

    /// The session task is no longer running
    #[error("Chat session is closed.")]
    SessionClosed,

    /// The request was cancelled because the session is shutting down
    #[error("Request cancelled.")]
    Cancelled,

    // ========================================================================
    // Input Errors (200-299)
    // ========================================================================

    /// Nothing to send
    #[error("Message has neither text nor an image.")]
    EmptyMessage,

    /// Nothing to search for
    #[error("Search query is empty.")]
    EmptySearchQuery,

    /// An operation needs an open conversation
    #[error("No friend selected.")]
    NoPeerSelected,

    /// A path segment or id is not a valid store key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Store Errors (400-499)
    // ========================================================================

    /// The database could not be reached
    #[error("Database unavailable: {0}")]
    StoreUnavailable(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The database rules rejected the request
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The database answered with an unexpected status
    #[error("Request failed with status {status}: {message}")]
    RequestFailed {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    // ========================================================================
    // Directory Errors (600-699)
    // ========================================================================

    /// No user matched
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Cannot befriend yourself
    #[error("Cannot add yourself as a friend.")]
    CannotAddSelf,

    /// No friendship edge with this user
    #[error("Not friends with {0}.")]
    NotFriends(String),

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Only the sender may delete a message
    #[error("Message {0} was not sent by you.")]
    NotMessageOwner(String),

    // ========================================================================
    // Attachment Errors (800-899)
    // ========================================================================

    /// Image MIME type is not accepted
    #[error("Unsupported image type: {0}")]
    UnsupportedImageType(String),

    /// Image exceeds the size limit
    #[error("Image too large: {size} bytes (max {max})")]
    ImageTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Configured maximum in bytes
        max: usize,
    },

    /// Upload to object storage failed
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Attachment has no bytes
    #[error("Image is empty: {0}")]
    EmptyImage(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Missing or malformed configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification of errors, used for user-facing notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Something that was looked up does not exist
    NotFound,
    /// The current user may not perform the operation
    Unauthorized,
    /// The store is temporarily unreachable; retrying may succeed
    Transient,
    /// The request itself is malformed or incomplete
    InvalidInput,
    /// Unexpected failure inside the client
    Internal,
}

impl ErrorKind {
    /// Short label for display
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Transient => "transient",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Session
    /// - 200-299: Input
    /// - 400-499: Store
    /// - 600-699: Directory
    /// - 700-799: Messages
    /// - 800-899: Attachments
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Session (100-199)
            Error::SessionClosed => 100,
            Error::Cancelled => 101,

            // Input (200-299)
            Error::EmptyMessage => 200,
            Error::EmptySearchQuery => 201,
            Error::NoPeerSelected => 202,
            Error::InvalidKey(_) => 203,

            // Store (400-499)
            Error::StoreUnavailable(_) => 400,
            Error::Timeout(_) => 401,
            Error::PermissionDenied(_) => 402,
            Error::RequestFailed { .. } => 403,

            // Directory (600-699)
            Error::UserNotFound(_) => 600,
            Error::CannotAddSelf => 601,
            Error::NotFriends(_) => 602,

            // Messages (700-799)
            Error::MessageNotFound(_) => 700,
            Error::NotMessageOwner(_) => 701,

            // Attachments (800-899)
            Error::UnsupportedImageType(_) => 800,
            Error::ImageTooLarge { .. } => 801,
            Error::UploadFailed(_) => 802,
            Error::EmptyImage(_) => 803,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
            Error::InvalidConfig(_) => 903,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UserNotFound(_) | Error::NotFriends(_) | Error::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::NotMessageOwner(_) | Error::PermissionDenied(_) => ErrorKind::Unauthorized,
            Error::StoreUnavailable(_) | Error::Timeout(_) => ErrorKind::Transient,
            Error::EmptyMessage
            | Error::EmptySearchQuery
            | Error::NoPeerSelected
            | Error::InvalidKey(_)
            | Error::CannotAddSelf
            | Error::UnsupportedImageType(_)
            | Error::ImageTooLarge { .. }
            | Error::EmptyImage(_)
            | Error::InvalidConfig(_) => ErrorKind::InvalidInput,
            Error::SessionClosed
            | Error::Cancelled
            | Error::RequestFailed { .. }
            | Error::UploadFailed(_)
            | Error::Internal(_)
            | Error::SerializationError(_)
            | Error::DeserializationError(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Error::StoreUnavailable(err.to_string())
        } else if err.is_decode() {
            Error::DeserializationError(err.to_string())
        } else if let Some(status) = err.status() {
            Error::RequestFailed {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Error::StoreUnavailable(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SessionClosed.code(), 100);
        assert_eq!(Error::EmptyMessage.code(), 200);
        assert_eq!(Error::StoreUnavailable("down".into()).code(), 400);
        assert_eq!(Error::UserNotFound("a@x.com".into()).code(), 600);
        assert_eq!(Error::MessageNotFound("m1".into()).code(), 700);
        assert_eq!(Error::UnsupportedImageType("image/bmp".into()).code(), 800);
        assert_eq!(Error::UploadFailed("x".into()).code(), 802);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::UserNotFound("a@x.com".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::NotMessageOwner("m1".into()).kind(), ErrorKind::Unauthorized);
        assert_eq!(Error::Timeout("get".into()).kind(), ErrorKind::Transient);
        assert_eq!(Error::EmptyMessage.kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::EmptyImage("a.png".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Timeout("test".into()).is_recoverable());
        assert!(Error::StoreUnavailable("offline".into()).is_recoverable());
        assert!(!Error::PermissionDenied("rules".into()).is_recoverable());
        assert!(!Error::EmptySearchQuery.is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ImageTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "Image too large: 20 bytes (max 10)");
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
    }
}
