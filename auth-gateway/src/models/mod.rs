pub mod access;
pub mod auth_token;
pub mod client;
pub mod refresh_token;
pub mod user;

pub use access::{AccessFlags, AccessRule, Permission, Resource, RuleEffect};
pub use auth_token::UserAuthToken;
pub use client::{ApplicationType, AuthClient};
pub use refresh_token::RefreshToken;
pub use user::{new_password_timestamp, ExternalLogin, Role, UserAccount, UserIdentity};
