//! Lifecycle management for browser child processes: launching, health
//! checking, terminating, and the debug-endpoint bookkeeping that goes
//! with them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{Config, DEFAULT_PORT};
use crate::detection;
use crate::error::{CdpError, Result};

pub mod config;
pub mod instance;

pub use config::{BrowserConfig, BrowserConfigBuilder, LAUNCH_TIMEOUT};
pub use instance::{InstanceSnapshot, InstanceStatus};

use instance::Instance;

/// How long a fresh child may take to prove it didn't exit on the spot.
const LAUNCH_GRACE: Duration = Duration::from_millis(500);

/// Window for a SIGTERM'd child to exit before SIGKILL.
const GRACEFUL_WAIT: Duration = Duration::from_secs(10);

/// Poll cadence while waiting out a graceful termination.
const REAP_POLL: Duration = Duration::from_millis(100);

/// Ports probed upward from the base before giving up.
const PORT_SCAN_RANGE: u16 = 256;

type HealthCallback = Box<dyn Fn(u32) + Send + Sync>;

#[derive(Debug, Default)]
struct Slots {
    next_id: u32,
    instances: HashMap<u32, Arc<Instance>>,
}

/// Owns every browser child this client spawns.
///
/// The slot table is guarded by one mutex, each instance's mutable state
/// by its own; table first, instance second, never the other way around.
/// Slots of stopped or failed instances stay queryable but hold neither a
/// port nor a place against the instance limit.
pub struct Registry {
    max_instances: usize,
    host: String,
    base_port: u16,
    default_executable: Option<PathBuf>,
    default_user_data_dir: Option<PathBuf>,
    temp_root: PathBuf,
    slots: Mutex<Slots>,
    health_callback: Mutex<Option<HealthCallback>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("max_instances", &self.max_instances)
            .field("base_port", &self.base_port)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(config: &Config) -> Self {
        Self {
            max_instances: config.max_instances,
            host: config.host.clone(),
            base_port: if config.port >= 1024 {
                config.port
            } else {
                DEFAULT_PORT
            },
            default_executable: config.chrome_executable.clone(),
            default_user_data_dir: config.user_data_dir.clone(),
            temp_root: std::env::temp_dir().join("cdp_chrome"),
            slots: Mutex::new(Slots {
                next_id: 1,
                instances: HashMap::new(),
            }),
            health_callback: Mutex::new(None),
        }
    }

    /// Registers the callback invoked (with the instance id) whenever a
    /// health check finds a child gone.
    pub fn on_health_failure(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        *self.health_callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Validates the config, reserves an id, a unique debug port and a
    /// profile directory, spawns the child and confirms it survives the
    /// grace period.
    pub async fn launch(&self, config: BrowserConfig) -> Result<u32> {
        config.validate().map_err(CdpError::InvalidConfig)?;

        let instance = {
            let mut slots = self.slots.lock().unwrap();
            let live = slots
                .instances
                .values()
                .filter(|instance| instance.status().is_live())
                .count();
            if live >= self.max_instances {
                return Err(CdpError::InstanceLimitReached(self.max_instances));
            }
            let port = self.allocate_port(&slots, config.debug_port)?;
            let id = slots.next_id;
            slots.next_id += 1;

            let (user_data_dir, ephemeral) = match config
                .user_data_dir
                .clone()
                .or_else(|| self.default_user_data_dir.clone())
            {
                Some(dir) => (dir, false),
                None => (
                    self.temp_root.join(format!("chrome_instance_{id}")),
                    true,
                ),
            };

            let instance = Arc::new(Instance::new(id, port, user_data_dir, ephemeral, config));
            slots.instances.insert(id, Arc::clone(&instance));
            instance
        };

        match self.spawn(&instance).await {
            Ok(()) => {
                debug!(
                    id = instance.id,
                    port = instance.debug_port,
                    "browser instance running"
                );
                Ok(instance.id)
            }
            Err(err) => {
                instance.record_error(InstanceStatus::Failed, err.to_string());
                self.discard_profile(&instance).await;
                Err(err)
            }
        }
    }

    /// Terminates an instance: SIGTERM with a bounded wait unless `force`,
    /// SIGKILL as the fallback, then reap and profile cleanup. Calling it
    /// again on a stopped instance is a no-op.
    pub async fn kill(&self, id: u32, force: bool) -> Result<()> {
        let instance = self.get(id)?;
        if !instance.status().is_live() {
            return Ok(());
        }
        instance.set_status(InstanceStatus::Stopping);

        let mut guard = instance.child.lock().await;
        if let Some(mut child) = guard.take() {
            let graceful = !force && terminate_gracefully(&mut child).await;
            if !graceful {
                if let Err(err) = child.start_kill() {
                    // Already-exited children are fine; anything else is a
                    // real failure.
                    if err.kind() != std::io::ErrorKind::InvalidInput {
                        *guard = Some(child);
                        instance.record_error(InstanceStatus::Unknown, err.to_string());
                        return Err(CdpError::KillFailed(id, err.to_string()));
                    }
                }
            }
            if let Err(err) = child.wait().await {
                instance.record_error(InstanceStatus::Unknown, err.to_string());
                return Err(CdpError::KillFailed(id, err.to_string()));
            }
        }
        drop(guard);

        self.discard_profile(&instance).await;
        instance.set_status(InstanceStatus::Stopped);
        debug!(id, "browser instance stopped");
        Ok(())
    }

    /// Asks the OS whether the child still exists. A disappeared child
    /// marks the instance crashed, bumps its failure counter and fires the
    /// registered health callback. Policy beyond that is the caller's.
    pub async fn check_health(&self, id: u32) -> Result<InstanceStatus> {
        let instance = self.get(id)?;

        let exit = {
            let mut child = instance.child.lock().await;
            match child.as_mut() {
                Some(child) => child.try_wait()?.map(|status| status.to_string()),
                None => None,
            }
        };

        let crashed = {
            let mut meta = instance.meta.lock().unwrap();
            meta.last_health_check = Some(Instant::now());
            let was_live = matches!(
                meta.status,
                InstanceStatus::Running | InstanceStatus::Starting
            );
            match exit {
                Some(exit) if was_live => {
                    meta.status = InstanceStatus::Crashed;
                    meta.health_failures += 1;
                    meta.last_error = Some(format!("process exited: {exit}"));
                    true
                }
                _ => false,
            }
        };

        if crashed {
            warn!(id, "browser instance crashed");
            if let Some(callback) = self.health_callback.lock().unwrap().as_ref() {
                callback(id);
            }
        }
        Ok(instance.status())
    }

    /// Relaunches a crashed instance in place, keeping its id, port and
    /// profile. Only crashed instances with auto-restart and budget left
    /// qualify.
    pub async fn restart(&self, id: u32) -> Result<()> {
        let instance = self.get(id)?;
        if !instance.restart_eligible() {
            return Err(CdpError::InvalidArgs(format!(
                "instance {id} is not eligible for restart"
            )));
        }
        {
            let mut meta = instance.meta.lock().unwrap();
            meta.restarts += 1;
            meta.status = InstanceStatus::Starting;
            meta.last_error = None;
        }
        instance.child.lock().await.take();
        match self.spawn(&instance).await {
            Ok(()) => {
                debug!(id, "browser instance relaunched");
                Ok(())
            }
            Err(err) => {
                instance.record_error(InstanceStatus::Failed, err.to_string());
                Err(err)
            }
        }
    }

    pub fn list(&self) -> Vec<InstanceSnapshot> {
        let slots = self.slots.lock().unwrap();
        let mut snapshots: Vec<_> = slots
            .instances
            .values()
            .map(|instance| instance.snapshot())
            .collect();
        snapshots.sort_by_key(|snap| snap.id);
        snapshots
    }

    pub fn find_by_pid(&self, pid: u32) -> Option<InstanceSnapshot> {
        self.list().into_iter().find(|snap| snap.pid == Some(pid))
    }

    pub fn find_by_port(&self, port: u16) -> Option<InstanceSnapshot> {
        self.list()
            .into_iter()
            .find(|snap| snap.debug_port == port && snap.status.is_live())
    }

    pub fn get_status(&self, id: u32) -> Result<InstanceStatus> {
        Ok(self.get(id)?.status())
    }

    /// Force-kills and retires every live instance. The safety net for
    /// abnormal shutdown paths.
    pub async fn emergency_cleanup(&self) -> Result<()> {
        let mut failures = Vec::new();
        for id in self.live_ids() {
            if let Err(err) = self.kill(id, true).await {
                failures.push(format!("instance {id}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CdpError::CleanupFailed(failures.join("; ")))
        }
    }

    /// Graceful-then-forced termination of everything owned.
    pub async fn shutdown(&self) {
        for id in self.live_ids() {
            if let Err(err) = self.kill(id, false).await {
                warn!(id, error = %err, "graceful kill failed, forcing");
                if let Err(err) = self.kill(id, true).await {
                    warn!(id, error = %err, "forced kill failed");
                }
            }
        }
    }

    /// Probes the instance's `/json/version` endpoint.
    pub async fn version(&self, id: u32) -> Result<VersionInfo> {
        let instance = self.get(id)?;
        let url = format!("http://{}:{}/json/version", self.host, instance.debug_port);
        let info = reqwest::get(&url).await?.error_for_status()?.json().await?;
        Ok(info)
    }

    /// Lists attachable targets via `/json/list`.
    pub async fn targets(&self, id: u32) -> Result<Vec<TargetInfo>> {
        let instance = self.get(id)?;
        let url = format!("http://{}:{}/json/list", self.host, instance.debug_port);
        let targets = reqwest::get(&url).await?.error_for_status()?.json().await?;
        Ok(targets)
    }

    fn get(&self, id: u32) -> Result<Arc<Instance>> {
        self.slots
            .lock()
            .unwrap()
            .instances
            .get(&id)
            .cloned()
            .ok_or(CdpError::NoSuchInstance(id))
    }

    fn live_ids(&self) -> Vec<u32> {
        let slots = self.slots.lock().unwrap();
        let mut ids: Vec<u32> = slots
            .instances
            .values()
            .filter(|instance| instance.status().is_live())
            .map(|instance| instance.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn allocate_port(&self, slots: &Slots, requested: u16) -> Result<u16> {
        let held: HashSet<u16> = slots
            .instances
            .values()
            .filter(|instance| instance.status().is_live())
            .map(|instance| instance.debug_port)
            .collect();

        if requested != 0 {
            if held.contains(&requested) {
                return Err(CdpError::PortConflict(requested));
            }
            return Ok(requested);
        }
        let base = self.base_port;
        for offset in 0..PORT_SCAN_RANGE {
            let port = base.saturating_add(offset);
            if !held.contains(&port) {
                return Ok(port);
            }
        }
        Err(CdpError::PortConflict(base))
    }

    async fn spawn(&self, instance: &Instance) -> Result<()> {
        if instance.ephemeral_profile {
            tokio::fs::create_dir_all(&instance.user_data_dir)
                .await
                .map_err(|err| {
                    CdpError::LaunchFailed(format!(
                        "creating {}: {err}",
                        instance.user_data_dir.display()
                    ))
                })?;
        }

        let executable = match instance
            .config
            .executable
            .clone()
            .or_else(|| self.default_executable.clone())
        {
            Some(path) => path,
            None => detection::default_executable().map_err(CdpError::LaunchFailed)?,
        };

        let args = instance
            .config
            .launch_args(instance.debug_port, &instance.user_data_dir);
        debug!(
            id = instance.id,
            executable = %executable.display(),
            port = instance.debug_port,
            "spawning browser"
        );

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref envs) = instance.config.process_envs {
            cmd.envs(envs);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| CdpError::LaunchFailed(format!("{}: {err}", executable.display())))?;
        let pid = child.id();

        tokio::time::sleep(LAUNCH_GRACE).await;
        if let Some(exit) = child
            .try_wait()
            .map_err(|err| CdpError::LaunchFailed(err.to_string()))?
        {
            return Err(CdpError::LaunchFailed(format!(
                "browser exited immediately: {exit}"
            )));
        }

        *instance.child.lock().await = Some(child);
        let mut meta = instance.meta.lock().unwrap();
        meta.status = InstanceStatus::Running;
        meta.pid = pid;
        meta.started_at = Instant::now();
        Ok(())
    }

    /// Removes an auto-provisioned profile. Directories supplied by the
    /// caller are never touched.
    async fn discard_profile(&self, instance: &Instance) {
        if !instance.ephemeral_profile || !instance.user_data_dir.starts_with(&self.temp_root) {
            return;
        }
        if let Err(err) = tokio::fs::remove_dir_all(&instance.user_data_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    id = instance.id,
                    dir = %instance.user_data_dir.display(),
                    error = %err,
                    "profile cleanup failed"
                );
            }
        }
    }
}

/// SIGTERM plus a bounded poll for the child to exit on its own. Returns
/// `false` when the forced path is still needed.
async fn terminate_gracefully(child: &mut Child) -> bool {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            return true;
        };
        if unsafe { libc::kill(pid as i32, libc::SIGTERM) } != 0 {
            return false;
        }
        let deadline = Instant::now() + GRACEFUL_WAIT;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => tokio::time::sleep(REAP_POLL).await,
                Err(_) => return false,
            }
        }
        false
    }
    #[cfg(not(unix))]
    {
        let _ = child;
        false
    }
}

/// Payload of `/json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

/// One entry of `/json/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    /// The `page/<id>` path segment a client connects to.
    pub fn target_path(&self) -> String {
        format!("{}/{}", self.target_type, self.id)
    }
}

/// First page-type target, the usual attach point.
pub fn first_page_target(targets: &[TargetInfo]) -> Option<&TargetInfo> {
    targets.iter().find(|target| target.target_type == "page")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_limit(limit: usize) -> Registry {
        let config = Config::builder().max_instances(limit).build().unwrap();
        Registry::new(&config)
    }

    fn seed_instance(registry: &Registry, port: u16, status: InstanceStatus) -> u32 {
        let mut slots = registry.slots.lock().unwrap();
        let id = slots.next_id;
        slots.next_id += 1;
        let instance = Arc::new(Instance::new(
            id,
            port,
            registry.temp_root.join(format!("chrome_instance_{id}")),
            true,
            BrowserConfig::default(),
        ));
        instance.set_status(status);
        slots.instances.insert(id, instance);
        id
    }

    #[test]
    fn ports_skip_live_instances() {
        let registry = registry_with_limit(4);
        seed_instance(&registry, 9222, InstanceStatus::Running);
        seed_instance(&registry, 9223, InstanceStatus::Running);

        let slots = registry.slots.lock().unwrap();
        assert_eq!(registry.allocate_port(&slots, 0).unwrap(), 9224);
    }

    #[test]
    fn explicit_port_conflicts_with_live_holder() {
        let registry = registry_with_limit(4);
        seed_instance(&registry, 9250, InstanceStatus::Running);

        let slots = registry.slots.lock().unwrap();
        assert!(matches!(
            registry.allocate_port(&slots, 9250),
            Err(CdpError::PortConflict(9250))
        ));
        assert_eq!(registry.allocate_port(&slots, 9251).unwrap(), 9251);
    }

    #[test]
    fn stopped_instances_release_their_port() {
        let registry = registry_with_limit(4);
        seed_instance(&registry, 9222, InstanceStatus::Stopped);

        let slots = registry.slots.lock().unwrap();
        assert_eq!(registry.allocate_port(&slots, 0).unwrap(), 9222);
    }

    #[tokio::test]
    async fn launch_rejects_invalid_config() {
        let registry = registry_with_limit(4);
        let mut config = BrowserConfig::default();
        config.window_size = (10, 10);
        assert!(matches!(
            registry.launch(config).await,
            Err(CdpError::InvalidConfig(_))
        ));
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn launch_respects_the_instance_limit() {
        let registry = registry_with_limit(1);
        seed_instance(&registry, 9222, InstanceStatus::Running);

        assert!(matches!(
            registry.launch(BrowserConfig::default()).await,
            Err(CdpError::InstanceLimitReached(1))
        ));
    }

    #[tokio::test]
    async fn kill_is_idempotent_on_stopped() {
        let registry = registry_with_limit(4);
        let id = seed_instance(&registry, 9222, InstanceStatus::Stopped);
        registry.kill(id, true).await.unwrap();
        registry.kill(id, false).await.unwrap();
        assert_eq!(registry.get_status(id).unwrap(), InstanceStatus::Stopped);
    }

    #[test]
    fn find_by_port_ignores_retired_slots() {
        let registry = registry_with_limit(4);
        seed_instance(&registry, 9230, InstanceStatus::Stopped);
        let live = seed_instance(&registry, 9231, InstanceStatus::Running);

        assert!(registry.find_by_port(9230).is_none());
        assert_eq!(registry.find_by_port(9231).unwrap().id, live);
    }

    #[test]
    fn first_page_target_skips_workers() {
        let targets = vec![
            TargetInfo {
                id: "W1".to_string(),
                target_type: "service_worker".to_string(),
                title: String::new(),
                url: String::new(),
                web_socket_debugger_url: None,
            },
            TargetInfo {
                id: "P1".to_string(),
                target_type: "page".to_string(),
                title: "blank".to_string(),
                url: "about:blank".to_string(),
                web_socket_debugger_url: None,
            },
        ];
        let target = first_page_target(&targets).unwrap();
        assert_eq!(target.id, "P1");
        assert_eq!(target.target_path(), "page/P1");
    }
}
