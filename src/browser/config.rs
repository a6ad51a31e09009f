use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default `Registry::launch` timeout in MS.
pub const LAUNCH_TIMEOUT: u64 = 20_000;

/// Relaunch budget for crashed instances with auto-restart.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Flags every managed instance gets for stable automation. Derived from
/// the set puppeteer passes.
pub(crate) const STABILITY_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--enable-automation",
    "--password-store=basic",
    "--use-mock-keychain",
];

/// Launch configuration of a single browser instance.
///
/// Validated by the registry before anything is spawned; every instance
/// keeps the snapshot it was launched with.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run without a visible window. Defaults to true.
    pub headless: bool,
    /// Run with the browser sandbox. Defaults to true.
    pub sandbox: bool,
    pub disable_gpu: bool,
    /// Write shared memory to /tmp instead of /dev/shm.
    pub disable_dev_shm: bool,
    pub incognito: bool,
    pub window_size: (u32, u32),
    /// Requested debugging port; `0` lets the registry pick one.
    pub debug_port: u16,
    /// Explicit binary; falls back to the client config, then detection.
    pub executable: Option<PathBuf>,
    /// Explicit profile directory. Must exist; never deleted by the
    /// registry. Unset means an ephemeral profile under the temp root.
    pub user_data_dir: Option<PathBuf>,
    pub proxy_server: Option<String>,
    pub user_agent: Option<String>,
    /// V8 old-space cap in MB.
    pub memory_limit_mb: Option<u32>,
    pub launch_timeout: Duration,
    /// Relaunch after a crash while the restart budget lasts.
    pub auto_restart: bool,
    pub max_restarts: u32,
    /// Extra command line arguments; keys already set are not duplicated.
    pub extra_args: Vec<String>,
    pub process_envs: Option<HashMap<String, String>>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfigBuilder::default().build().expect("default launch config is valid")
    }
}

impl BrowserConfig {
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }

    /// Checks the ranges the registry insists on.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.debug_port != 0 && self.debug_port < 1024 {
            return Err(format!(
                "debug_port {} is privileged; use 0 for automatic allocation",
                self.debug_port
            ));
        }
        let (width, height) = self.window_size;
        if !(100..=4096).contains(&width) || !(100..=4096).contains(&height) {
            return Err(format!(
                "window size {width}x{height} is outside 100..=4096"
            ));
        }
        if let Some(limit) = self.memory_limit_mb {
            if !(64..=8192).contains(&limit) {
                return Err(format!("memory limit {limit} MB is outside 64..=8192"));
            }
        }
        let timeout = self.launch_timeout.as_secs();
        if !(5..=300).contains(&timeout) {
            return Err(format!("launch timeout {timeout}s is outside 5..=300"));
        }
        if let Some(ref dir) = self.user_data_dir {
            if !dir.is_dir() {
                return Err(format!(
                    "user data dir {} is not a directory",
                    dir.display()
                ));
            }
        }
        Ok(())
    }

    /// Assembles the argument vector for `port` and `user_data_dir`.
    /// Extra arguments never override the managed keys.
    pub(crate) fn launch_args(&self, port: u16, user_data_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={port}"),
            format!("--user-data-dir={}", user_data_dir.display()),
            format!("--window-size={},{}", self.window_size.0, self.window_size.1),
        ];
        if self.headless {
            args.push("--headless".to_string());
            args.push("--hide-scrollbars".to_string());
            args.push("--mute-audio".to_string());
        }
        if !self.sandbox {
            args.push("--no-sandbox".to_string());
            args.push("--disable-setuid-sandbox".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if self.disable_dev_shm {
            args.push("--disable-dev-shm-usage".to_string());
        }
        if self.incognito {
            args.push("--incognito".to_string());
        }
        if let Some(ref proxy) = self.proxy_server {
            args.push(format!("--proxy-server={proxy}"));
        }
        if let Some(ref agent) = self.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        if let Some(limit) = self.memory_limit_mb {
            args.push(format!("--max_old_space_size={limit}"));
        }
        args.extend(STABILITY_ARGS.iter().map(|arg| arg.to_string()));

        for extra in &self.extra_args {
            if !args.iter().any(|have| arg_key(have) == arg_key(extra)) {
                args.push(extra.clone());
            }
        }

        args.push("about:blank".to_string());
        args
    }
}

/// The `--key` part of a flag, ignoring any `=value` suffix.
fn arg_key(arg: &str) -> &str {
    arg.split_once('=').map_or(arg, |(key, _)| key)
}

#[derive(Debug, Clone)]
pub struct BrowserConfigBuilder {
    headless: bool,
    sandbox: bool,
    disable_gpu: bool,
    disable_dev_shm: bool,
    incognito: bool,
    window_size: (u32, u32),
    debug_port: u16,
    executable: Option<PathBuf>,
    user_data_dir: Option<PathBuf>,
    proxy_server: Option<String>,
    user_agent: Option<String>,
    memory_limit_mb: Option<u32>,
    launch_timeout: Duration,
    auto_restart: bool,
    max_restarts: u32,
    extra_args: Vec<String>,
    process_envs: Option<HashMap<String, String>>,
}

impl Default for BrowserConfigBuilder {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            disable_gpu: false,
            disable_dev_shm: false,
            incognito: false,
            window_size: (1280, 720),
            debug_port: 0,
            executable: None,
            user_data_dir: None,
            proxy_server: None,
            user_agent: None,
            memory_limit_mb: None,
            launch_timeout: Duration::from_millis(LAUNCH_TIMEOUT),
            auto_restart: false,
            max_restarts: DEFAULT_MAX_RESTARTS,
            extra_args: Vec::new(),
            process_envs: None,
        }
    }
}

impl BrowserConfigBuilder {
    pub fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }

    pub fn no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    pub fn disable_gpu(mut self) -> Self {
        self.disable_gpu = true;
        self
    }

    pub fn disable_dev_shm(mut self) -> Self {
        self.disable_dev_shm = true;
        self
    }

    pub fn incognito(mut self) -> Self {
        self.incognito = true;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = (width, height);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.debug_port = port;
        self
    }

    pub fn chrome_executable(mut self, path: impl AsRef<Path>) -> Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn user_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.user_data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn proxy_server(mut self, proxy: impl Into<String>) -> Self {
        self.proxy_server = Some(proxy.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn memory_limit_mb(mut self, limit: u32) -> Self {
        self.memory_limit_mb = Some(limit);
        self
    }

    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    pub fn auto_restart(mut self, max_restarts: u32) -> Self {
        self.auto_restart = true;
        self.max_restarts = max_restarts;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.extra_args.push(arg.into());
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.process_envs
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), val.into());
        self
    }

    pub fn build(self) -> Result<BrowserConfig, String> {
        let config = BrowserConfig {
            headless: self.headless,
            sandbox: self.sandbox,
            disable_gpu: self.disable_gpu,
            disable_dev_shm: self.disable_dev_shm,
            incognito: self.incognito,
            window_size: self.window_size,
            debug_port: self.debug_port,
            executable: self.executable,
            user_data_dir: self.user_data_dir,
            proxy_server: self.proxy_server,
            user_agent: self.user_agent,
            memory_limit_mb: self.memory_limit_mb,
            launch_timeout: self.launch_timeout,
            auto_restart: self.auto_restart,
            max_restarts: self.max_restarts,
            extra_args: self.extra_args,
            process_envs: self.process_envs,
        };
        config.validate()?;
        Ok(config)
    }
}
