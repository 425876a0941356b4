use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Staff,
    Hod,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
            Role::Hod => "hod",
            Role::Admin => "admin",
        }
    }
}

/// Identity resolved once at session.login. Handlers branch on the role
/// tag; nothing downstream probes the database to discover capabilities.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub full_name: String,
    pub role: Role,
    /// Student or staff profile id, None for plain admin users.
    pub profile_id: Option<String>,
    pub department_id: Option<String>,
    /// Set for students only.
    pub classroom_id: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub principal: Option<Principal>,
}
