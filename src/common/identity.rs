//! Caller identity resolved by the authentication collaborator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Signed up but not yet approved.
    Pending,
    /// Regular verified user.
    User,
    /// Elevated user allowed cross-user operations.
    Admin,
}

/// Error returned when a role string is not recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRoleParseError {
    value: String,
}

impl UserRoleParseError {
    /// The raw value that failed parsing.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for UserRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid user role: {}", self.value)
    }
}

impl std::error::Error for UserRoleParseError {}

impl UserRole {
    /// Canonical lowercase identifier, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Whether the role has passed verification.
    #[must_use]
    pub const fn is_verified(self) -> bool {
        matches!(self, Self::User | Self::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = UserRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        [Self::Pending, Self::User, Self::Admin]
            .into_iter()
            .find(|role| raw.eq_ignore_ascii_case(role.as_str()))
            .ok_or_else(|| UserRoleParseError {
                value: raw.to_string(),
            })
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User id, matched against `ChatLogRecord::user_id`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Account role.
    pub role: UserRole,
}

impl AuthUser {
    /// Build an identity.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    /// Whether the caller holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether the caller may read or modify a record owned by `owner_id`.
    #[must_use]
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Admin".parse::<UserRole>(), Ok(UserRole::Admin));
        assert_eq!(" user ".parse::<UserRole>(), Ok(UserRole::User));
        let err = "root".parse::<UserRole>().unwrap_err();
        assert_eq!(err.value(), "root");
    }

    #[test]
    fn test_pending_is_not_verified() {
        assert!(!UserRole::Pending.is_verified());
        assert!(UserRole::User.is_verified());
        assert!(UserRole::Admin.is_verified());
    }

    #[test]
    fn test_can_access_owner_or_admin() {
        let owner = AuthUser::new("u1", "Alice", UserRole::User);
        let other = AuthUser::new("u2", "Bob", UserRole::User);
        let admin = AuthUser::new("root", "Root", UserRole::Admin);

        assert!(owner.can_access("u1"));
        assert!(!other.can_access("u1"));
        assert!(admin.can_access("u1"));
    }
}
