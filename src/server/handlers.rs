//! Boundary handlers: thin adapters from message params to Policy Engine
//! calls (§2 "Boundary handlers", §6.1 wire protocol).

use crate::policy::{LoginOutcome, PolicyEngine};
use crate::store::types::PortStatus;
use crate::time::format_local;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type HandlerFuture = Pin<Box<dyn Future<Output = Value> + Send>>;
type HandlerFn = fn(Arc<PolicyEngine>, Value, String) -> HandlerFuture;

/// Map from command string to handler value (§9 "Polymorphic dispatch").
pub fn handler_table() -> HashMap<&'static str, HandlerFn> {
    let mut table: HashMap<&'static str, HandlerFn> = HashMap::new();
    table.insert("login", |engine, params, ip| Box::pin(login(engine, params, ip)));
    table.insert("signup", |engine, params, _ip| Box::pin(signup(engine, params)));
    table.insert("logout", |engine, params, _ip| Box::pin(logout(engine, params)));
    table.insert("update_activity", |engine, params, _ip| {
        Box::pin(update_activity(engine, params))
    });
    table.insert("get_ports", |engine, _params, _ip| Box::pin(get_ports(engine)));
    table.insert("update_port", |engine, params, _ip| Box::pin(update_port(engine, params)));
    table.insert("get_attackers", |engine, _params, _ip| Box::pin(get_attackers(engine)));
    table.insert("get_potential_attackers", |engine, _params, _ip| {
        Box::pin(get_potential_attackers(engine))
    });
    table.insert("ban_ip", |engine, params, _ip| Box::pin(ban_ip(engine, params)));
    table.insert("unban_ip", |engine, params, _ip| Box::pin(unban_ip(engine, params)));
    table.insert("get_banned_ips", |engine, _params, _ip| Box::pin(get_banned_ips(engine)));
    table.insert("get_active_users", |engine, _params, _ip| {
        Box::pin(get_active_users(engine))
    });
    table
}

fn missing_param(name: &str) -> Value {
    json!({ "status": "error", "message": format!("Missing parameter: {name}") })
}

fn str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

async fn login(engine: Arc<PolicyEngine>, params: Value, client_ip: String) -> Value {
    let (Some(username), Some(password)) = (str_param(&params, "username"), str_param(&params, "password")) else {
        return missing_param("username/password");
    };
    let port = params.get("port").and_then(Value::as_u64).unwrap_or(0) as u16;

    match engine.check_login(username, password, &client_ip, port).await {
        Ok(result) => {
            let status = match result.outcome {
                LoginOutcome::Admin => "admin",
                LoginOutcome::Valid => "valid",
                // The wire protocol spells the decoy outcome "fake" (§6.1, GLOSSARY).
                LoginOutcome::Decoy => "fake",
                LoginOutcome::Error => "error",
            };
            match result.reason {
                Some(reason) => json!({ "status": status, "message": reason }),
                None => json!({ "status": status }),
            }
        }
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn signup(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let (Some(username), Some(password)) = (str_param(&params, "username"), str_param(&params, "password")) else {
        return missing_param("username/password");
    };
    match engine.create_user(username, password).await {
        Ok((true, message)) => json!({ "status": "success", "message": message }),
        Ok((false, message)) => json!({ "status": "error", "message": message }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn logout(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let Some(username) = str_param(&params, "username") else {
        return missing_param("username");
    };
    match engine.logout(username).await {
        Ok(()) => json!({ "status": "success", "message": format!("{username} logged out") }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn update_activity(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let Some(username) = str_param(&params, "username") else {
        return missing_param("username");
    };
    match engine.update_activity(username).await {
        Ok(true) => json!({ "status": "updated" }),
        Ok(false) => json!({ "status": "error" }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn get_ports(engine: Arc<PolicyEngine>) -> Value {
    match engine.store().load_ports().await {
        Ok(ports) => json!({ "status": "success", "data": ports }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn update_port(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let Some(port) = params.get("port").and_then(Value::as_u64) else {
        return missing_param("port");
    };
    let status = match str_param(&params, "status") {
        Some("active") => Some(PortStatus::Active),
        Some("inactive") => Some(PortStatus::Inactive),
        Some(other) => return json!({ "status": "error", "message": format!("Invalid status: {other}") }),
        None => None,
    };
    let decoy = params.get("honeypot").and_then(Value::as_bool);
    if status.is_none() && decoy.is_none() {
        return json!({ "status": "error", "message": "Must supply status or honeypot" });
    }

    match engine.toggle_port(port as u16, status, decoy).await {
        Ok(true) => json!({ "status": "success" }),
        Ok(false) => json!({ "status": "error", "message": format!("Unknown port: {port}") }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn get_attackers(engine: Arc<PolicyEngine>) -> Value {
    match engine.store().load_attackers().await {
        Ok(records) => json!({ "status": "success", "data": records }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn get_potential_attackers(engine: Arc<PolicyEngine>) -> Value {
    match engine.store().load_potential_attackers().await {
        Ok(records) => json!({ "status": "success", "data": records }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn ban_ip(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let Some(ip) = str_param(&params, "ip") else {
        return missing_param("ip");
    };
    match engine.ban_ip(ip).await {
        Ok(true) => json!({ "status": "success", "message": format!("{ip} banned") }),
        Ok(false) => json!({ "status": "error", "message": format!("Failed to ban {ip}") }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn unban_ip(engine: Arc<PolicyEngine>, params: Value) -> Value {
    let Some(ip) = str_param(&params, "ip") else {
        return missing_param("ip");
    };
    match engine.unban_ip(ip).await {
        Ok(true) => json!({ "status": "success", "message": format!("{ip} unbanned") }),
        Ok(false) => json!({ "status": "error", "message": format!("Failed to unban {ip}") }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn get_banned_ips(engine: Arc<PolicyEngine>) -> Value {
    match engine.store().load_banned_ips().await {
        Ok(ips) => json!({ "status": "success", "data": ips }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

async fn get_active_users(engine: Arc<PolicyEngine>) -> Value {
    match engine.store().load_sessions().await {
        Ok(sessions) => {
            let data: Vec<Value> = sessions
                .into_iter()
                .map(|(username, session)| {
                    json!({
                        "username": username,
                        "ip": session.ip,
                        "port": session.port,
                        "login_time": format_local(&session.login_time),
                        "last_activity": format_local(&session.last_activity_time),
                        "session_length": format!("{} mins", crate::time::minutes_since(&session.login_time)),
                        "inactive_for": format!("{} mins", crate::time::minutes_since(&session.last_activity_time)),
                    })
                })
                .collect();
            json!({ "status": "success", "data": data })
        }
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc as StdArc;

    async fn engine() -> (StdArc<PolicyEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StdArc::new(Store::open(dir.path()).await.unwrap());
        let visibility = StdArc::new(crate::visibility::PortVisibilitySupervisor::new());
        (StdArc::new(PolicyEngine::new(store, visibility)), dir)
    }

    #[tokio::test]
    async fn signup_then_login_round_trip() {
        let (engine, _dir) = engine().await;
        let resp = signup(engine.clone(), json!({"username":"alice","password":"alicepw"})).await;
        assert_eq!(resp["status"], "success");

        let resp = login(engine.clone(), json!({"username":"alice","password":"alicepw","port":8001}), "10.0.0.1".to_string()).await;
        assert_eq!(resp["status"], "valid");
    }

    #[tokio::test]
    async fn login_decoy_outcome_spells_fake_on_wire() {
        let (engine, _dir) = engine().await;
        engine.ban_ip("10.0.0.9").await.unwrap();
        let resp = login(engine.clone(), json!({"username":"nobody","password":"whatever","port":8001}), "10.0.0.9".to_string()).await;
        assert_eq!(resp["status"], "fake");
        assert_eq!(resp["message"], "IP address banned");
    }

    #[tokio::test]
    async fn get_ports_reflects_update_port() {
        let (engine, _dir) = engine().await;
        let resp = update_port(engine.clone(), json!({"port": 8001, "honeypot": true})).await;
        assert_eq!(resp["status"], "success");

        let resp = get_ports(engine.clone()).await;
        let ports = resp["data"].as_array().unwrap();
        let port = ports.iter().find(|p| p["port"] == 8001).unwrap();
        assert_eq!(port["honeypot"], true);
    }

    #[tokio::test]
    async fn update_port_to_inactive_starts_rst_listener() {
        let (engine, _dir) = engine().await;
        let resp = update_port(engine.clone(), json!({"port": 8001, "status": "inactive"})).await;
        assert_eq!(resp["status"], "success");
        assert!(engine.visibility().is_running(8001).await);
    }

    #[tokio::test]
    async fn ban_then_get_banned_ips_round_trip() {
        let (engine, _dir) = engine().await;
        let resp = ban_ip(engine.clone(), json!({"ip": "1.2.3.4"})).await;
        assert_eq!(resp["status"], "success");

        let resp = get_banned_ips(engine.clone()).await;
        assert_eq!(resp["data"], json!(["1.2.3.4"]));
    }

    #[tokio::test]
    async fn logout_removes_from_active_users() {
        let (engine, _dir) = engine().await;
        signup(engine.clone(), json!({"username":"alice","password":"alicepw"})).await;
        login(engine.clone(), json!({"username":"alice","password":"alicepw","port":8001}), "10.0.0.1".to_string()).await;

        let resp = get_active_users(engine.clone()).await;
        assert_eq!(resp["data"].as_array().unwrap().len(), 1);

        logout(engine.clone(), json!({"username":"alice"})).await;
        let resp = get_active_users(engine.clone()).await;
        assert_eq!(resp["data"].as_array().unwrap().len(), 0);
    }
}
