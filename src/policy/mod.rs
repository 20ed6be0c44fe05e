//! Pure decision functions over Store snapshots (§4.B).
//!
//! Every function here reads the collections it needs, decides, and writes
//! back only the collections it mutates — exactly the collections named in
//! the per-step description below. No function holds a lock across two
//! `Store` calls; cross-collection races are accepted (§5, §9).

use crate::config::{ADMIN_PASSWORD, ADMIN_USERNAME};
use crate::error::Result;
use crate::store::types::{reasons, PortStatus, Session, SuspectRecord};
use crate::store::Store;
use crate::time::now_rfc3339;
use crate::visibility::PortVisibilitySupervisor;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const FAILED_LOGIN_ESCALATION_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Admin,
    Valid,
    Decoy,
    Error,
}

pub struct LoginResult {
    pub outcome: LoginOutcome,
    pub reason: Option<&'static str>,
}

impl LoginResult {
    fn new(outcome: LoginOutcome, reason: Option<&'static str>) -> Self {
        LoginResult { outcome, reason }
    }
}

/// In-memory failure counter keyed by `(username, ip)` (§3). Process-local,
/// never persisted — a restart forgives all prior failures (§9).
#[derive(Default)]
pub struct AttemptCounter {
    counts: DashMap<(String, String), u32>,
}

impl AttemptCounter {
    pub fn new() -> Self {
        AttemptCounter {
            counts: DashMap::new(),
        }
    }

    fn increment(&self, username: &str, ip: &str) -> u32 {
        let mut entry = self
            .counts
            .entry((username.to_string(), ip.to_string()))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    fn clear(&self, username: &str, ip: &str) {
        self.counts.remove(&(username.to_string(), ip.to_string()));
    }

    #[cfg(test)]
    fn get(&self, username: &str, ip: &str) -> u32 {
        self.counts
            .get(&(username.to_string(), ip.to_string()))
            .map(|v| *v)
            .unwrap_or(0)
    }
}

/// Coordinates the Store, the in-memory attempt counter, and the Port
/// Visibility Supervisor. Cloneable (all state is behind `Arc`) so handlers
/// can hold their own copy.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<Store>,
    attempts: Arc<AttemptCounter>,
    visibility: Arc<PortVisibilitySupervisor>,
}

impl PolicyEngine {
    /// `visibility` is reconfigured by `toggle_port` whenever a port's
    /// `status` changes (§4.C "Reconfigured by Policy Engine"), keeping the
    /// live RST-on-accept worker set in step with `ports.json` at runtime,
    /// not just at startup sync (I3/I4).
    pub fn new(store: Arc<Store>, visibility: Arc<PortVisibilitySupervisor>) -> Self {
        PolicyEngine {
            store,
            attempts: Arc::new(AttemptCounter::new()),
            visibility,
        }
    }

    /// §4.B `check_login`. Decision order is strict and observable:
    /// admin bypass, ban gate, length validation, decoy-port gate,
    /// credential match, failure escalation.
    pub async fn check_login(
        &self,
        username: &str,
        password: &str,
        client_ip: &str,
        port: u16,
    ) -> Result<LoginResult> {
        // 1. Admin bypass — short-circuits every subsequent check,
        // including the ban list (I5).
        if username == ADMIN_USERNAME && password == ADMIN_PASSWORD {
            info!(%username, %client_ip, "admin login");
            return Ok(LoginResult::new(LoginOutcome::Admin, None));
        }

        // 2. Ban gate.
        let banned = self.store.load_banned_ips().await?;
        if banned.iter().any(|ip| ip == client_ip) {
            debug!(%client_ip, "login rejected: banned ip");
            return Ok(LoginResult::new(
                LoginOutcome::Decoy,
                Some("IP address banned"),
            ));
        }

        // 3. Length validation.
        if username.len() < 3 || password.len() < 3 {
            return Ok(LoginResult::new(
                LoginOutcome::Error,
                Some("Invalid username/password length"),
            ));
        }

        // 4. Decoy-port gate (I6).
        let mut ports = self.store.load_ports().await?;
        if let Some(p) = ports.iter().find(|p| p.port == port) {
            if p.status == PortStatus::Active && p.decoy {
                debug!(%username, port, "login routed to decoy: port in decoy mode");
                return Ok(LoginResult::new(LoginOutcome::Decoy, None));
            }
        }

        // 5. Credential match.
        let users = self.store.load_users().await?;
        if let Some(user) = users.get(username) {
            if user.password == password {
                self.attempts.clear(username, client_ip);
                let mut sessions = self.store.load_sessions().await?;
                let now = now_rfc3339();
                sessions.insert(
                    username.to_string(),
                    Session {
                        login_time: now.clone(),
                        last_activity_time: now,
                        ip: client_ip.to_string(),
                        port,
                    },
                );
                self.store.save_sessions(&sessions).await?;
                info!(%username, %client_ip, port, "login valid");
                return Ok(LoginResult::new(LoginOutcome::Valid, None));
            }
        }

        // 6. Failure escalation.
        let attempts = self.attempts.increment(username, client_ip);
        if attempts >= FAILED_LOGIN_ESCALATION_THRESHOLD {
            let mut suspects = self.store.load_potential_attackers().await?;
            upsert_suspect(
                &mut suspects,
                SuspectRecord {
                    username: username.to_string(),
                    ip: client_ip.to_string(),
                    attempted_port: port,
                    attempts: Some(attempts),
                    reason: reasons::FAILED_LOGINS.to_string(),
                    timestamp: now_rfc3339(),
                },
            );
            self.store.save_potential_attackers(&suspects).await?;

            if let Some(p) = ports.iter_mut().find(|p| p.port == port) {
                p.decoy = true;
                p.last_triggered = now_rfc3339();
                self.store.save_ports(&ports).await?;
            }

            info!(%username, %client_ip, port, attempts, "login escalated to decoy");
            return Ok(LoginResult::new(LoginOutcome::Decoy, None));
        }

        debug!(%username, %client_ip, "login rejected: bad credentials");
        Ok(LoginResult::new(
            LoginOutcome::Error,
            Some("Incorrect username/password"),
        ))
    }

    /// §4.B `create_user`.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(bool, String)> {
        if username.len() < 3 || password.len() < 3 {
            return Ok((false, "Invalid username/password length".to_string()));
        }
        let mut users = self.store.load_users().await?;
        if users.contains_key(username) {
            return Ok((false, format!("User '{username}' already exists")));
        }
        users.insert(
            username.to_string(),
            crate::store::types::User {
                password: password.to_string(),
            },
        );
        self.store.save_users(&users).await?;
        info!(%username, "user created");
        Ok((true, format!("User '{username}' created")))
    }

    /// §4.B `logout`.
    pub async fn logout(&self, username: &str) -> Result<()> {
        let mut sessions = self.store.load_sessions().await?;
        if sessions.remove(username).is_some() {
            self.store.save_sessions(&sessions).await?;
            info!(%username, "logout");
        }
        Ok(())
    }

    /// §4.B `update_activity`. Returns true unconditionally (the caller is
    /// trusted to be authenticated).
    pub async fn update_activity(&self, username: &str) -> Result<bool> {
        let mut sessions = self.store.load_sessions().await?;
        if let Some(session) = sessions.get_mut(username) {
            session.last_activity_time = now_rfc3339();
            self.store.save_sessions(&sessions).await?;
        }
        Ok(true)
    }

    /// §4.B `inactivity_sweep`. Removes sessions idle longer than
    /// `inactivity_limit`, demoting their port to decoy mode and recording
    /// a suspect entry (L7).
    pub async fn inactivity_sweep(&self, inactivity_limit: std::time::Duration) -> Result<usize> {
        let sessions = self.store.load_sessions().await?;
        let limit_secs = inactivity_limit.as_secs() as i64;

        let mut expired = Vec::new();
        for (username, session) in sessions.iter() {
            if username == ADMIN_USERNAME {
                continue;
            }
            if let Some(idle_secs) = crate::time::seconds_since(&session.last_activity_time) {
                if idle_secs > limit_secs {
                    expired.push((username.clone(), session.clone()));
                }
            }
        }
        if expired.is_empty() {
            return Ok(0);
        }

        let mut sessions = sessions;
        let mut suspects = self.store.load_potential_attackers().await?;
        let mut ports = self.store.load_ports().await?;

        for (username, session) in &expired {
            upsert_suspect(
                &mut suspects,
                SuspectRecord {
                    username: username.clone(),
                    ip: session.ip.clone(),
                    attempted_port: session.port,
                    attempts: None,
                    reason: reasons::INACTIVE.to_string(),
                    timestamp: now_rfc3339(),
                },
            );
            if let Some(p) = ports.iter_mut().find(|p| p.port == session.port) {
                p.decoy = true;
                p.last_triggered = now_rfc3339();
            }
            sessions.remove(username);
        }

        self.store.save_sessions(&sessions).await?;
        self.store.save_potential_attackers(&suspects).await?;
        self.store.save_ports(&ports).await?;

        info!(count = expired.len(), "inactivity sweep removed sessions");
        Ok(expired.len())
    }

    /// §4.B `toggle_port`. At least one of `status`/`decoy` must be
    /// supplied; returns false for an unknown port. A `status` change is
    /// pushed to the Port Visibility Supervisor (§4.C) before returning, so
    /// an RST-on-accept worker starts or stops in step with the mutation
    /// (I3/I4).
    pub async fn toggle_port(
        &self,
        port: u16,
        status: Option<PortStatus>,
        decoy: Option<bool>,
    ) -> Result<bool> {
        let mut ports = self.store.load_ports().await?;
        let Some(p) = ports.iter_mut().find(|p| p.port == port) else {
            return Ok(false);
        };
        if let Some(status) = status {
            p.status = status;
        }
        if let Some(decoy) = decoy {
            p.decoy = decoy;
        }
        self.store.save_ports(&ports).await?;
        info!(port, ?status, ?decoy, "port toggled");

        if let Some(status) = status {
            self.visibility
                .set_visibility(port, status == PortStatus::Active)
                .await;
        }
        Ok(true)
    }

    /// §4.B `ban_ip`. Idempotent.
    pub async fn ban_ip(&self, ip: &str) -> Result<bool> {
        let mut banned = self.store.load_banned_ips().await?;
        if !banned.iter().any(|existing| existing == ip) {
            banned.push(ip.to_string());
            self.store.save_banned_ips(&banned).await?;
            info!(%ip, "ip banned");
        }
        Ok(true)
    }

    /// §4.B `unban_ip`. Idempotent.
    pub async fn unban_ip(&self, ip: &str) -> Result<bool> {
        let mut banned = self.store.load_banned_ips().await?;
        let before = banned.len();
        banned.retain(|existing| existing != ip);
        if banned.len() != before {
            self.store.save_banned_ips(&banned).await?;
            info!(%ip, "ip unbanned");
        }
        Ok(true)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[cfg(test)]
    pub fn visibility(&self) -> &Arc<PortVisibilitySupervisor> {
        &self.visibility
    }

    #[cfg(test)]
    pub fn attempts_for(&self, username: &str, ip: &str) -> u32 {
        self.attempts.get(username, ip)
    }
}

/// Append-on-first-seen, overwrite-in-place otherwise (§3).
fn upsert_suspect(suspects: &mut Vec<SuspectRecord>, record: SuspectRecord) {
    match suspects
        .iter_mut()
        .find(|s| s.username == record.username && s.ip == record.ip)
    {
        Some(existing) => *existing = record,
        None => suspects.push(record),
    }
}
