pub mod token;
pub mod user;

pub use token::{InMemoryTokenStore, TokenStore};
pub use user::{InMemoryUserDirectory, UserDirectory};
