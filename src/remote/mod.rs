//! Remote device directory integration
//!
//! - `client`: HTTP client (token management, request dispatch)
//! - `token`: access token state

pub mod client;
pub mod token;

pub use client::RemoteClient;
pub use token::AuthToken;
