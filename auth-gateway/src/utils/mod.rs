pub mod hashing;
pub mod password;
pub mod validation;

pub use hashing::{constant_time_eq, hash_secret, verify_secret};
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use validation::ValidatedJson;
