use serde::{Deserialize, Serialize};

/// A registered credential pair. Never mutated after signup, never deleted
/// by the core (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Active,
    Inactive,
}

/// A front-facing service port under gateway control (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub port: u16,
    pub status: PortStatus,
    /// Wire/on-disk name is `honeypot` (§6.1/§6.2); internal field is `decoy`.
    #[serde(rename = "honeypot")]
    pub decoy: bool,
    pub last_triggered: String,
}

impl Port {
    pub fn new(port: u16, status: PortStatus) -> Self {
        Port {
            port,
            status,
            decoy: false,
            last_triggered: crate::time::NEVER.to_string(),
        }
    }
}

/// An authenticated caller's live session (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub login_time: String,
    pub last_activity_time: String,
    pub ip: String,
    pub port: u16,
}

/// A standard reason string for suspect/attacker records (§3).
pub mod reasons {
    pub const FAILED_LOGINS: &str = "2 or more failed login attempts";
    pub const INACTIVE: &str = "Inactive for 5+ minutes";
}

/// A `potential_attackers` / `attackers` record. At most one entry per
/// `(username, ip)` in the suspects collection; a later record overwrites
/// the earlier one in place (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuspectRecord {
    pub username: String,
    pub ip: String,
    pub attempted_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub reason: String,
    pub timestamp: String,
}
