pub mod authentication;
pub mod token;

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Generic API failure or acknowledgement body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[serde(rename = "Message")]
    #[schema(example = "UserSessionExpired")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lenient boolean for form fields: `true`/`false` in any case, `1`/`0`,
/// `on`, or an empty value.
pub(crate) fn form_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean value: {}",
            other
        ))),
    }
}
