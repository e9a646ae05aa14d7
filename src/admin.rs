//! Operator interface: inspect and reset per-client state, and edit the
//! allow/deny lists while the process is running.
//!
//! [`AdminHandle`] exposes typed methods. [`AdminCommand`] is the same surface
//! as a JSON wire format, executed through the [`AdminService`] trait so a
//! transport (HTTP endpoint, message bus, CLI) can drive it.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::SuspiciousActivity;
use crate::config::AdmissionSettings;
use crate::engine::{scoped_key, AdmissionControl};
use crate::error::AdminError;
use crate::identity::ClientKey;

/// Usage of one route by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUsage {
    pub route: String,
    pub in_window: usize,
    pub in_burst: usize,
}

/// Everything the engine currently knows about a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
    pub client: ClientKey,
    pub reputation: u8,
    pub blocked: bool,
    pub suspicion: Option<SuspiciousActivity>,
    pub routes: Vec<RouteUsage>,
}

/// Administrative handle over a shared [`AdmissionControl`].
#[derive(Clone, Debug)]
pub struct AdminHandle {
    control: Arc<AdmissionControl>,
}

impl AdminHandle {
    pub fn new(control: Arc<AdmissionControl>) -> Self {
        Self { control }
    }

    /// Snapshot of a client's reputation, suspicion record and route usage.
    pub fn inspect(&self, client: &ClientKey) -> ClientSnapshot {
        let control = &self.control;
        let now = control.now_millis();
        let key = client.as_str();
        let settings = control.settings().get();

        let mut routes: BTreeSet<String> = BTreeSet::new();
        routes.extend(route_keys(&control.window().store().keys(now), key));
        routes.extend(route_keys(&control.burst().store().keys(now), key));

        let routes = routes
            .into_iter()
            .map(|route| {
                let scoped = scoped_key(key, &route);
                let window = settings.policies.lookup(&route).window();
                RouteUsage {
                    in_window: control.window().count(&scoped, window, now),
                    in_burst: control.burst().count(&scoped, now),
                    route,
                }
            })
            .collect();

        ClientSnapshot {
            client: client.clone(),
            reputation: control.reputation().score(key, now),
            blocked: control.classifier().is_blocked(key, now),
            suspicion: control.classifier().activity(key, now),
            routes,
        }
    }

    /// Forget everything about a client: windows, bursts, suspicion, reputation.
    pub fn reset_client(&self, client: &ClientKey) -> usize {
        let control = &self.control;
        let key = client.as_str();
        let _guard = control.locks().lock(key);
        let now = control.now_millis();
        let prefix = format!("{key}|");

        let mut removed = 0;
        for store in [control.window().store(), control.burst().store()] {
            for scoped in store.keys(now).into_iter().filter(|k| k.starts_with(&prefix)) {
                removed += usize::from(store.remove(&scoped).is_some());
            }
        }
        removed += usize::from(control.classifier().store().remove(key).is_some());
        removed += usize::from(control.reputation().store().remove(key).is_some());
        info!(target: "turnstile::admin", client = %client, removed, "client state reset");
        removed
    }

    /// Reset every client whose key was derived from `ip`.
    pub fn reset_ip(&self, ip: &str) -> Result<usize, AdminError> {
        let ip = parse_ip(ip)?;
        let prefix = format!("{ip}:");
        let clients: Vec<ClientKey> = self
            .tracked_clients()
            .into_iter()
            .filter(|c| c.as_str().starts_with(&prefix))
            .collect();
        Ok(clients.iter().map(|c| self.reset_client(c)).sum())
    }

    /// Lift a hard block (and the evidence behind it) without touching budgets.
    pub fn unblock(&self, client: &ClientKey) -> bool {
        let _guard = self.control.locks().lock(client.as_str());
        let removed = self.control.classifier().store().remove(client.as_str()).is_some();
        info!(target: "turnstile::admin", client = %client, removed, "suspicion record cleared");
        removed
    }

    /// Overwrite a client's reputation score (clamped to 0..=100).
    pub fn set_reputation(&self, client: &ClientKey, score: u8) {
        let _guard = self.control.locks().lock(client.as_str());
        let now = self.control.now_millis();
        self.control.reputation().set(client.as_str(), score, now);
        info!(target: "turnstile::admin", client = %client, score, "reputation overridden");
    }

    /// Clients with a live suspicion record or reputation score.
    pub fn tracked_clients(&self) -> Vec<ClientKey> {
        let now = self.control.now_millis();
        let mut keys: BTreeSet<String> = BTreeSet::new();
        keys.extend(self.control.classifier().store().keys(now));
        keys.extend(self.control.reputation().store().keys(now));
        keys.iter().map(|k| ClientKey::from(k.as_str())).collect()
    }

    pub fn blacklist_add(&self, ip: &str) -> Result<bool, AdminError> {
        let ip = parse_ip(ip)?;
        Ok(self.edit_lists("blacklist_add", ip, |s| s.blacklist.insert(ip)))
    }

    pub fn blacklist_remove(&self, ip: &str) -> Result<bool, AdminError> {
        let ip = parse_ip(ip)?;
        Ok(self.edit_lists("blacklist_remove", ip, |s| s.blacklist.remove(&ip)))
    }

    pub fn whitelist_add(&self, ip: &str) -> Result<bool, AdminError> {
        let ip = parse_ip(ip)?;
        Ok(self.edit_lists("whitelist_add", ip, |s| s.whitelist.insert(ip)))
    }

    pub fn whitelist_remove(&self, ip: &str) -> Result<bool, AdminError> {
        let ip = parse_ip(ip)?;
        Ok(self.edit_lists("whitelist_remove", ip, |s| s.whitelist.remove(&ip)))
    }

    /// Purge expired records from every store.
    pub fn purge_expired(&self) -> usize {
        self.control.purge_expired()
    }

    fn edit_lists<F>(&self, op: &'static str, ip: IpAddr, edit: F) -> bool
    where
        F: Fn(&mut AdmissionSettings) -> bool,
    {
        let changed = AtomicBool::new(false);
        self.control.settings().update(|current| {
            let mut next = current.clone();
            changed.store(edit(&mut next), Ordering::Relaxed);
            next
        });
        let changed = changed.into_inner();
        info!(target: "turnstile::admin", op, ip = %ip, changed, "access list updated");
        changed
    }
}

fn route_keys<'a>(keys: &'a [String], client: &str) -> impl Iterator<Item = String> + 'a {
    let prefix = format!("{client}|");
    keys.iter().filter_map(move |k| k.strip_prefix(prefix.as_str()).map(str::to_string))
}

fn parse_ip(raw: &str) -> Result<IpAddr, AdminError> {
    raw.trim().parse().map_err(|_| AdminError::InvalidArgs(format!("not an IP address: '{raw}'")))
}

/// Wire form of the administrative operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminCommand {
    Inspect { client: String },
    ResetClient { client: String },
    ResetIp { ip: String },
    Unblock { client: String },
    SetReputation { client: String, score: u8 },
    BlacklistAdd { ip: String },
    BlacklistRemove { ip: String },
    WhitelistAdd { ip: String },
    WhitelistRemove { ip: String },
    ListClients,
    Purge,
}

impl AdminCommand {
    /// Decode a JSON command such as `{"op":"unblock","client":"192.0.2.1:anonymous"}`.
    pub fn from_json(raw: &str) -> Result<Self, AdminError> {
        serde_json::from_str(raw).map_err(|e| AdminError::Malformed(e.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AdminCommand::Inspect { .. } => "inspect",
            AdminCommand::ResetClient { .. } => "reset_client",
            AdminCommand::ResetIp { .. } => "reset_ip",
            AdminCommand::Unblock { .. } => "unblock",
            AdminCommand::SetReputation { .. } => "set_reputation",
            AdminCommand::BlacklistAdd { .. } => "blacklist_add",
            AdminCommand::BlacklistRemove { .. } => "blacklist_remove",
            AdminCommand::WhitelistAdd { .. } => "whitelist_add",
            AdminCommand::WhitelistRemove { .. } => "whitelist_remove",
            AdminCommand::ListClients => "list_clients",
            AdminCommand::Purge => "purge",
        }
    }
}

/// Result of an administrative command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AdminResponse {
    Ack,
    Snapshot(ClientSnapshot),
    Clients(Vec<ClientKey>),
    Removed(usize),
    Changed(bool),
}

/// Executes administrative commands.
#[async_trait]
pub trait AdminService: Send + Sync {
    async fn execute(&self, cmd: AdminCommand) -> Result<AdminResponse, AdminError>;
}

#[async_trait]
impl AdminService for AdminHandle {
    async fn execute(&self, cmd: AdminCommand) -> Result<AdminResponse, AdminError> {
        let label = cmd.label();
        let response = match cmd {
            AdminCommand::Inspect { client } => {
                AdminResponse::Snapshot(self.inspect(&ClientKey::from(client.as_str())))
            }
            AdminCommand::ResetClient { client } => {
                AdminResponse::Removed(self.reset_client(&ClientKey::from(client.as_str())))
            }
            AdminCommand::ResetIp { ip } => AdminResponse::Removed(self.reset_ip(&ip)?),
            AdminCommand::Unblock { client } => {
                AdminResponse::Changed(self.unblock(&ClientKey::from(client.as_str())))
            }
            AdminCommand::SetReputation { client, score } => {
                if score > crate::reputation::MAX_SCORE {
                    return Err(AdminError::InvalidArgs(format!("score must be 0..=100 (got {score})")));
                }
                self.set_reputation(&ClientKey::from(client.as_str()), score);
                AdminResponse::Ack
            }
            AdminCommand::BlacklistAdd { ip } => AdminResponse::Changed(self.blacklist_add(&ip)?),
            AdminCommand::BlacklistRemove { ip } => {
                AdminResponse::Changed(self.blacklist_remove(&ip)?)
            }
            AdminCommand::WhitelistAdd { ip } => AdminResponse::Changed(self.whitelist_add(&ip)?),
            AdminCommand::WhitelistRemove { ip } => {
                AdminResponse::Changed(self.whitelist_remove(&ip)?)
            }
            AdminCommand::ListClients => AdminResponse::Clients(self.tracked_clients()),
            AdminCommand::Purge => AdminResponse::Removed(self.purge_expired()),
        };
        tracing::debug!(target: "turnstile::admin", command = label, "admin command executed");
        Ok(response)
    }
}
