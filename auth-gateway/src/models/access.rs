use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use uuid::Uuid;

/// Named logical entity that permissions are checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
}

/// Named, integer-coded action. Built-in codes are negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub code: i32,
    pub name: String,
}

impl Permission {
    pub const CREATE: i32 = -1;
    pub const READ: i32 = -2;
    pub const UPDATE: i32 = -3;
    pub const DELETE: i32 = -4;
    pub const ALLOW: i32 = -5;
    pub const DENY: i32 = -6;

    /// The built-in permission set.
    pub fn builtin() -> Vec<Permission> {
        [
            (Self::CREATE, "Create"),
            (Self::READ, "Read"),
            (Self::UPDATE, "Update"),
            (Self::DELETE, "Delete"),
            (Self::ALLOW, "Allow"),
            (Self::DENY, "Deny"),
        ]
        .into_iter()
        .map(|(code, name)| Permission {
            code,
            name: name.to_string(),
        })
        .collect()
    }

    /// Default permission name for an HTTP method when a route names only a
    /// resource.
    pub fn name_for_method(method: &Method) -> Option<&'static str> {
        match *method {
            Method::GET | Method::HEAD => Some("Read"),
            Method::POST => Some("Create"),
            Method::PUT | Method::PATCH => Some("Update"),
            Method::DELETE => Some("Delete"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEffect {
    Grant,
    Deny,
}

/// Grants or denies `permission_code` on `resource_id` to one security id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    pub security_id: Uuid,
    pub resource_id: Uuid,
    pub permission_code: i32,
    pub effect: RuleEffect,
}

/// Result bitset of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags(0);
    pub const ACCESS: AccessFlags = AccessFlags(0b001);
    pub const DENIED: AccessFlags = AccessFlags(0b010);
    pub const NO_RULE: AccessFlags = AccessFlags(0b100);

    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        AccessFlags(self.0 | rhs.0)
    }
}
