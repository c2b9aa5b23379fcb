//! HTTP handlers for the auth gateway.

pub mod authentication;
pub mod health;
pub mod token;

pub use authentication::*;
pub use health::*;
pub use token::*;
