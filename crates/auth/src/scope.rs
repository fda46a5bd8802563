use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Named permission attached to a credential.
///
/// `"*"` is the wildcard and satisfies every check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(Cow<'static, str>);

impl Scope {
    pub const READ: Scope = Scope(Cow::Borrowed("read"));
    pub const WRITE: Scope = Scope(Cow::Borrowed("write"));
    pub const ADMIN: Scope = Scope(Cow::Borrowed("admin"));
    pub const WILDCARD: Scope = Scope(Cow::Borrowed("*"));

    /// Every scope a credential can hold.
    pub fn all() -> [Scope; 4] {
        [Self::READ, Self::WRITE, Self::ADMIN, Self::WILDCARD]
    }

    pub fn parse(name: &str) -> Result<Self, AuthError> {
        let name = name.trim();
        Self::all()
            .into_iter()
            .find(|s| s.as_str() == name)
            .ok_or_else(|| AuthError::InvalidScope(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
