//! Domain entities representing core business objects.

pub mod message;
pub mod token;
pub mod user;

// Re-export commonly used types
pub use message::{QueueMessage, DEFAULT_SENDER};
pub use token::{
    AccessGrant, Claims, Identity, RefreshRecord, SubjectId, TokenKind, TokenPair,
};
pub use user::UserAccount;
