use std::path::PathBuf;
use std::time::Instant;

use tokio::process::Child;

use super::config::BrowserConfig;

/// Lifecycle of a managed browser child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Failed,
}

impl InstanceStatus {
    /// Whether the slot counts toward the instance limit and holds its
    /// debug port.
    pub fn is_live(self) -> bool {
        !matches!(self, InstanceStatus::Stopped | InstanceStatus::Failed)
    }
}

/// Mutable per-instance bookkeeping, guarded by the instance mutex.
#[derive(Debug)]
pub(crate) struct InstanceMeta {
    pub status: InstanceStatus,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub last_health_check: Option<Instant>,
    pub last_activity: Option<Instant>,
    pub health_failures: u32,
    pub restarts: u32,
    pub auto_restart: bool,
    pub last_error: Option<String>,
}

/// One registry slot. The identity fields never change after launch; the
/// meta mutex guards everything that does. Lock order is always registry
/// table first, then instance.
#[derive(Debug)]
pub(crate) struct Instance {
    pub id: u32,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
    /// Profile directory provisioned by the registry; removed on kill.
    pub ephemeral_profile: bool,
    pub config: BrowserConfig,
    pub meta: std::sync::Mutex<InstanceMeta>,
    /// The child handle; held across kill/reap awaits.
    pub child: tokio::sync::Mutex<Option<Child>>,
}

impl Instance {
    pub(crate) fn new(
        id: u32,
        debug_port: u16,
        user_data_dir: PathBuf,
        ephemeral_profile: bool,
        config: BrowserConfig,
    ) -> Self {
        let auto_restart = config.auto_restart;
        Self {
            id,
            debug_port,
            user_data_dir,
            ephemeral_profile,
            config,
            meta: std::sync::Mutex::new(InstanceMeta {
                status: InstanceStatus::Starting,
                pid: None,
                started_at: Instant::now(),
                last_health_check: None,
                last_activity: None,
                health_failures: 0,
                restarts: 0,
                auto_restart,
                last_error: None,
            }),
            child: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        self.meta.lock().unwrap().status
    }

    pub(crate) fn set_status(&self, status: InstanceStatus) {
        self.meta.lock().unwrap().status = status;
    }

    pub(crate) fn record_error(&self, status: InstanceStatus, error: impl Into<String>) {
        let mut meta = self.meta.lock().unwrap();
        meta.status = status;
        meta.last_error = Some(error.into());
    }

    /// Whether a relaunch may be attempted for this slot.
    pub(crate) fn restart_eligible(&self) -> bool {
        let meta = self.meta.lock().unwrap();
        meta.status == InstanceStatus::Crashed
            && meta.auto_restart
            && meta.restarts < self.config.max_restarts
    }

    pub(crate) fn snapshot(&self) -> InstanceSnapshot {
        let meta = self.meta.lock().unwrap();
        InstanceSnapshot {
            id: self.id,
            pid: meta.pid,
            debug_port: self.debug_port,
            user_data_dir: self.user_data_dir.clone(),
            status: meta.status,
            uptime: meta.started_at.elapsed(),
            last_health_check: meta.last_health_check.map(|at| at.elapsed()),
            last_activity: meta.last_activity.map(|at| at.elapsed()),
            health_failures: meta.health_failures,
            restarts: meta.restarts,
            auto_restart: meta.auto_restart,
            last_error: meta.last_error.clone(),
        }
    }
}

/// Read-only copy of an instance's state; nothing in it points back into
/// the registry.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub id: u32,
    pub pid: Option<u32>,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
    pub status: InstanceStatus,
    pub uptime: std::time::Duration,
    pub last_health_check: Option<std::time::Duration>,
    pub last_activity: Option<std::time::Duration>,
    pub health_failures: u32,
    pub restarts: u32,
    pub auto_restart: bool,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_by_status() {
        assert!(InstanceStatus::Running.is_live());
        assert!(InstanceStatus::Starting.is_live());
        assert!(InstanceStatus::Crashed.is_live());
        assert!(!InstanceStatus::Stopped.is_live());
        assert!(!InstanceStatus::Failed.is_live());
    }

    #[test]
    fn restart_eligibility() {
        let config = BrowserConfig::builder().auto_restart(2).build().unwrap();
        let instance = Instance::new(1, 9222, "/tmp/p".into(), true, config);
        assert!(!instance.restart_eligible());

        instance.set_status(InstanceStatus::Crashed);
        assert!(instance.restart_eligible());

        instance.meta.lock().unwrap().restarts = 2;
        assert!(!instance.restart_eligible());
    }

    #[test]
    fn snapshot_is_detached() {
        let instance = Instance::new(7, 9230, "/tmp/p".into(), false, BrowserConfig::default());
        instance.record_error(InstanceStatus::Failed, "spawn refused");
        let snap = instance.snapshot();
        assert_eq!(snap.id, 7);
        assert_eq!(snap.status, InstanceStatus::Failed);
        assert_eq!(snap.last_error.as_deref(), Some("spawn refused"));
    }
}
