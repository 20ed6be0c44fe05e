//! File-backed collection store (§4.A).
//!
//! Each of the six collections is independently readable and writable as a
//! whole. Writes are full-rewrites (write to a sibling temp file, then
//! rename over the target) so a reader never observes a partial write.
//! Missing-file and malformed-content both yield an empty snapshot of the
//! appropriate shape rather than an error — persistence failures are not
//! surfaced to callers (§7.5).

pub mod types;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;
use types::{Port, PortStatus, Session, SuspectRecord, User};

pub struct Store {
    base_dir: PathBuf,
    users: Mutex<()>,
    sessions: Mutex<()>,
    ports: Mutex<()>,
    banned_ips: Mutex<()>,
    attackers: Mutex<()>,
    potential_attackers: Mutex<()>,
}

impl Store {
    /// Opens (creating if necessary) the store rooted at `base_dir`, seeding
    /// the `ports` and `users` collections on first startup (§4.A).
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        let store = Store {
            base_dir,
            users: Mutex::new(()),
            sessions: Mutex::new(()),
            ports: Mutex::new(()),
            banned_ips: Mutex::new(()),
            attackers: Mutex::new(()),
            potential_attackers: Mutex::new(()),
        };
        store.seed().await?;
        Ok(store)
    }

    async fn seed(&self) -> Result<()> {
        let ports = self.load_ports().await?;
        if ports.is_empty() {
            let seeded = vec![
                Port::new(8001, PortStatus::Active),
                Port::new(8002, PortStatus::Active),
                Port::new(8003, PortStatus::Active),
                Port::new(8004, PortStatus::Inactive),
                Port::new(8005, PortStatus::Inactive),
            ];
            self.save_ports(&seeded).await?;
        }

        let users = self.load_users().await?;
        if users.is_empty() {
            let mut seeded = HashMap::new();
            seeded.insert(
                "user".to_string(),
                User {
                    password: "password".to_string(),
                },
            );
            self.save_users(&seeded).await?;
        }
        Ok(())
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    pub async fn load_users(&self) -> Result<HashMap<String, User>> {
        let _guard = self.users.lock().await;
        load_json(&self.path("users.json")).await
    }

    pub async fn save_users(&self, data: &HashMap<String, User>) -> Result<()> {
        let _guard = self.users.lock().await;
        save_json(&self.path("users.json"), data).await
    }

    pub async fn load_sessions(&self) -> Result<HashMap<String, Session>> {
        let _guard = self.sessions.lock().await;
        load_json(&self.path("sessions.json")).await
    }

    pub async fn save_sessions(&self, data: &HashMap<String, Session>) -> Result<()> {
        let _guard = self.sessions.lock().await;
        save_json(&self.path("sessions.json"), data).await
    }

    pub async fn load_ports(&self) -> Result<Vec<Port>> {
        let _guard = self.ports.lock().await;
        load_json(&self.path("ports.json")).await
    }

    pub async fn save_ports(&self, data: &[Port]) -> Result<()> {
        let _guard = self.ports.lock().await;
        save_json(&self.path("ports.json"), data).await
    }

    pub async fn load_banned_ips(&self) -> Result<Vec<String>> {
        let _guard = self.banned_ips.lock().await;
        load_json(&self.path("banned_ips.json")).await
    }

    pub async fn save_banned_ips(&self, data: &[String]) -> Result<()> {
        let _guard = self.banned_ips.lock().await;
        save_json(&self.path("banned_ips.json"), data).await
    }

    pub async fn load_attackers(&self) -> Result<Vec<SuspectRecord>> {
        let _guard = self.attackers.lock().await;
        load_json(&self.path("attackers.json")).await
    }

    pub async fn load_potential_attackers(&self) -> Result<Vec<SuspectRecord>> {
        let _guard = self.potential_attackers.lock().await;
        load_json(&self.path("potential_attackers.json")).await
    }

    pub async fn save_potential_attackers(&self, data: &[SuspectRecord]) -> Result<()> {
        let _guard = self.potential_attackers.lock().await;
        save_json(&self.path("potential_attackers.json"), data).await
    }
}

async fn load_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed store file, treating as empty");
                Ok(T::default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "store file unreadable, treating as empty");
            Ok(T::default())
        }
    }
}

async fn save_json<T>(path: &Path, data: &T) -> Result<()>
where
    T: Serialize,
{
    let bytes = serde_json::to_vec_pretty(data)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_default_ports_and_users_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let ports = store.load_ports().await.unwrap();
        assert_eq!(ports.len(), 5);
        assert!(ports
            .iter()
            .filter(|p| p.status == PortStatus::Active)
            .count()
            == 3);
        assert!(ports
            .iter()
            .filter(|p| p.status == PortStatus::Inactive)
            .count()
            == 2);
        assert!(ports.iter().all(|p| !p.decoy && p.last_triggered == "Never"));

        let users = store.load_users().await.unwrap();
        assert_eq!(users.get("user").unwrap().password, "password");
    }

    #[tokio::test]
    async fn reopening_does_not_reseed_over_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).await.unwrap();
            let mut users = store.load_users().await.unwrap();
            users.insert(
                "alice".to_string(),
                User {
                    password: "alicepw".to_string(),
                },
            );
            store.save_users(&users).await.unwrap();
        }
        let store = Store::open(dir.path()).await.unwrap();
        let users = store.load_users().await.unwrap();
        assert!(users.contains_key("alice"));
        assert!(users.contains_key("user"));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let attackers = store.load_attackers().await.unwrap();
        assert!(attackers.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("banned_ips.json"), b"not json")
            .await
            .unwrap();
        let banned = store.load_banned_ips().await.unwrap();
        assert!(banned.is_empty());
    }

    #[tokio::test]
    async fn round_trips_banned_ips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store
            .save_banned_ips(&["1.2.3.4".to_string()])
            .await
            .unwrap();
        let banned = store.load_banned_ips().await.unwrap();
        assert_eq!(banned, vec!["1.2.3.4".to_string()]);
    }
}
