use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DiaryError;

/// One of the two participants in the diary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Partner,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Master, Role::Partner];

    pub fn other(self) -> Role {
        match self {
            Role::Master => Role::Partner,
            Role::Partner => Role::Master,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Partner => "partner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DiaryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "master" => Ok(Role::Master),
            "partner" => Ok(Role::Partner),
            other => Err(DiaryError::invalid(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
}

/// Static identity table. Exactly one identity per role.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    users: Vec<UserProfile>,
}

impl RoleRegistry {
    pub fn new(users: Vec<UserProfile>) -> Result<Self, DiaryError> {
        for role in Role::ALL {
            let count = users.iter().filter(|user| user.role == role).count();
            if count != 1 {
                return Err(DiaryError::Config(format!(
                    "expected exactly one user for role {role}, found {count}"
                )));
            }
        }
        Ok(Self { users })
    }

    pub fn profile_of(&self, identity: &str) -> Option<&UserProfile> {
        let identity = identity.trim();
        self.users
            .iter()
            .find(|user| user.identity.eq_ignore_ascii_case(identity))
    }

    pub fn role_of(&self, identity: &str) -> Option<Role> {
        self.profile_of(identity).map(|user| user.role)
    }

    pub fn display_name_of(&self, identity: &str) -> Option<&str> {
        self.profile_of(identity).map(|user| user.display_name.as_str())
    }

    pub fn label_for(&self, role: Role) -> &str {
        self.users
            .iter()
            .find(|user| user.role == role)
            .map(|user| user.display_name.as_str())
            .unwrap_or(role.as_str())
    }
}
