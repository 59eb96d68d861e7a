//! Relay process supervision
//!
//! The manager only talks to [`RelaySupervisor`]. [`ProcessRelaySupervisor`]
//! runs one relay child per endpoint and restarts it when the command line it
//! would be launched with changes or the process has exited.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::models::ProxyEndpoint;

/// Startup period a relay must survive to count as alive
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Starts, stops and reports on the relays serving endpoints
#[async_trait]
pub trait RelaySupervisor: Send + Sync {
    /// Make sure a relay serves `endpoint` via `backend_uri`; returns liveness
    async fn ensure(&self, endpoint: &ProxyEndpoint, backend_uri: &str) -> bool;

    /// Stop every relay whose endpoint id is not in `active_ids`
    async fn cleanup(&self, active_ids: &HashSet<String>);

    async fn stop_all(&self);

    /// Diagnostic snapshot, opaque to the manager
    fn status(&self) -> Value;
}

struct RelayProcess {
    child: Child,
    pid: Option<u32>,
    signature: Vec<String>,
    listen: String,
    started_at: DateTime<Utc>,
}

impl RelayProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Supervises one relay child process per endpoint
pub struct ProcessRelaySupervisor {
    config: RelayConfig,
    startup_grace: Duration,
    processes: Mutex<HashMap<String, RelayProcess>>,
}

impl ProcessRelaySupervisor {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            startup_grace: DEFAULT_STARTUP_GRACE,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    fn relay_args(&self, endpoint: &ProxyEndpoint, backend_uri: &str) -> Vec<String> {
        vec![
            "-listen".to_string(),
            endpoint.listen_uri(),
            "-forward".to_string(),
            backend_uri.to_string(),
            "-strategy".to_string(),
            self.config.strategy.clone(),
            "-check".to_string(),
            self.config.health_check_url.clone(),
            "-checkinterval".to_string(),
            self.config.check_interval.to_string(),
        ]
    }

    /// Remove the endpoint's process unless it is running with `signature`
    fn take_stale(&self, endpoint_id: &str, signature: &[String]) -> StaleCheck {
        let mut processes = self.processes.lock();
        let Some(process) = processes.get_mut(endpoint_id) else {
            return StaleCheck::Missing;
        };
        if process.signature == signature && process.is_running() {
            return StaleCheck::Running;
        }
        match processes.remove(endpoint_id) {
            Some(process) => StaleCheck::Stale(process),
            None => StaleCheck::Missing,
        }
    }
}

enum StaleCheck {
    Running,
    Missing,
    Stale(RelayProcess),
}

async fn terminate(endpoint_id: &str, mut process: RelayProcess) {
    if let Err(e) = process.child.kill().await {
        debug!(endpoint_id, "Relay already gone: {}", e);
    }
}

#[async_trait]
impl RelaySupervisor for ProcessRelaySupervisor {
    async fn ensure(&self, endpoint: &ProxyEndpoint, backend_uri: &str) -> bool {
        let args = self.relay_args(endpoint, backend_uri);

        match self.take_stale(&endpoint.id, &args) {
            StaleCheck::Running => return true,
            StaleCheck::Stale(process) => {
                debug!(endpoint_id = %endpoint.id, "Restarting relay");
                terminate(&endpoint.id, process).await;
            }
            StaleCheck::Missing => {}
        }

        let mut child = match Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    endpoint_id = %endpoint.id,
                    binary = %self.config.binary.display(),
                    "Failed to start relay: {}",
                    e
                );
                return false;
            }
        };

        tokio::time::sleep(self.startup_grace).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                warn!(endpoint_id = %endpoint.id, %status, "Relay exited during startup");
                return false;
            }
            Err(e) => {
                warn!(endpoint_id = %endpoint.id, "Failed to poll relay: {}", e);
                return false;
            }
        }

        let process = RelayProcess {
            pid: child.id(),
            child,
            signature: args,
            listen: endpoint.listen_uri(),
            started_at: Utc::now(),
        };
        debug!(endpoint_id = %endpoint.id, pid = ?process.pid, "Relay started");

        let replaced = self.processes.lock().insert(endpoint.id.clone(), process);
        if let Some(previous) = replaced {
            terminate(&endpoint.id, previous).await;
        }
        true
    }

    async fn cleanup(&self, active_ids: &HashSet<String>) {
        let stale: Vec<(String, RelayProcess)> = {
            let mut processes = self.processes.lock();
            let ids: Vec<String> = processes
                .keys()
                .filter(|id| !active_ids.contains(*id))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| processes.remove(&id).map(|p| (id, p)))
                .collect()
        };

        if !stale.is_empty() {
            info!(count = stale.len(), "Stopping unreferenced relays");
        }
        for (id, process) in stale {
            terminate(&id, process).await;
        }
    }

    async fn stop_all(&self) {
        let all: Vec<(String, RelayProcess)> = self.processes.lock().drain().collect();
        if !all.is_empty() {
            info!(count = all.len(), "Stopping all relays");
        }
        for (id, process) in all {
            terminate(&id, process).await;
        }
    }

    fn status(&self) -> Value {
        let mut processes = self.processes.lock();
        let entries: Map<String, Value> = processes
            .iter_mut()
            .map(|(id, process)| {
                let running = process.is_running();
                (
                    id.clone(),
                    json!({
                        "pid": process.pid,
                        "listen": process.listen,
                        "running": running,
                        "startedAt": process.started_at,
                    }),
                )
            })
            .collect();
        Value::Object(entries)
    }
}
