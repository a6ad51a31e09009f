use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default DevTools debugging port.
pub const DEFAULT_PORT: u16 = 9222;

/// Standard per-command timeout in MS.
pub const REQUEST_TIMEOUT: u64 = 30_000;

/// Default cap on non-terminal commands held by the bus.
pub const COMMAND_CAPACITY: usize = 100;

/// Default cap on concurrently managed browser instances.
pub const INSTANCE_LIMIT: usize = 32;

/// Immutable client configuration.
///
/// Built once via [`Config::builder`] and shared read-only afterwards; the
/// runtime never mutates it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the DevTools endpoint listens on.
    pub host: String,
    /// Debug port of the DevTools endpoint.
    pub port: u16,
    /// User data directory handed to launched instances that don't bring
    /// their own.
    pub user_data_dir: Option<PathBuf>,
    /// Path for Chrome or Chromium. Auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// Emit per-syscall diagnostics with failures.
    pub verbose: bool,
    /// Script source evaluated on every new document once connected.
    pub init_script: Option<String>,
    /// Like `init_script`, read from a file at connect time.
    pub init_script_file: Option<PathBuf>,
    /// Subscribe to DOM events on connect.
    pub dom_events: bool,
    /// Subscribe to Network events on connect.
    pub network_events: bool,
    /// Subscribe to console output (via the Runtime domain) on connect.
    pub console_events: bool,
    /// Upper bound on live browser instances in the registry.
    pub max_instances: usize,
    /// Upper bound on non-terminal commands held by the bus.
    pub command_capacity: usize,
    /// TCP connect + handshake deadline.
    pub connect_timeout: Duration,
    /// Default deadline for a submitted command.
    pub command_timeout: Duration,
    /// Reconnect attempts before the connection is given up.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Ceiling for the doubled reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Incoming frames declaring a larger payload drop the connection.
    pub max_incoming_frame_size: usize,
    /// Outgoing frames larger than this are refused.
    pub max_outgoing_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build().expect("default config is valid")
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The HTTP side of the debug endpoint, e.g. `http://127.0.0.1:9222`.
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Resolves the init script: inline source wins, otherwise the file is
    /// read.
    pub async fn resolve_init_script(&self) -> std::io::Result<Option<String>> {
        if let Some(ref src) = self.init_script {
            return Ok(Some(src.clone()));
        }
        if let Some(ref path) = self.init_script_file {
            return tokio::fs::read_to_string(path).await.map(Some);
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: u16,
    user_data_dir: Option<PathBuf>,
    chrome_executable: Option<PathBuf>,
    verbose: bool,
    init_script: Option<String>,
    init_script_file: Option<PathBuf>,
    dom_events: bool,
    network_events: bool,
    console_events: bool,
    max_instances: usize,
    command_capacity: usize,
    connect_timeout: Duration,
    command_timeout: Duration,
    max_reconnect_attempts: u32,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
    max_incoming_frame_size: usize,
    max_outgoing_frame_size: usize,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            user_data_dir: None,
            chrome_executable: None,
            verbose: false,
            init_script: None,
            init_script_file: None,
            dom_events: false,
            network_events: false,
            console_events: false,
            max_instances: INSTANCE_LIMIT,
            command_capacity: COMMAND_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_millis(REQUEST_TIMEOUT),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(30),
            max_incoming_frame_size: 64 << 20,
            max_outgoing_frame_size: 64 << 20,
        }
    }
}

impl ConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.user_data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn chrome_executable(mut self, path: impl AsRef<Path>) -> Self {
        self.chrome_executable = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn init_script(mut self, source: impl Into<String>) -> Self {
        self.init_script = Some(source.into());
        self
    }

    pub fn init_script_file(mut self, path: impl AsRef<Path>) -> Self {
        self.init_script_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn dom_events(mut self) -> Self {
        self.dom_events = true;
        self
    }

    pub fn network_events(mut self) -> Self {
        self.network_events = true;
        self
    }

    pub fn console_events(mut self) -> Self {
        self.console_events = true;
        self
    }

    pub fn max_instances(mut self, limit: usize) -> Self {
        self.max_instances = limit;
        self
    }

    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    pub fn max_incoming_frame_size(mut self, size: usize) -> Self {
        self.max_incoming_frame_size = size;
        self
    }

    pub fn max_outgoing_frame_size(mut self, size: usize) -> Self {
        self.max_outgoing_frame_size = size;
        self
    }

    pub fn build(self) -> Result<Config, String> {
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        if self.max_instances == 0 || self.max_instances > INSTANCE_LIMIT {
            return Err(format!(
                "max_instances must be within 1..={INSTANCE_LIMIT}"
            ));
        }
        if self.command_capacity == 0 {
            return Err("command_capacity must be non-zero".to_string());
        }
        if self.init_script.is_some() && self.init_script_file.is_some() {
            return Err("init_script and init_script_file are mutually exclusive".to_string());
        }
        Ok(Config {
            host: self.host,
            port: self.port,
            user_data_dir: self.user_data_dir,
            chrome_executable: self.chrome_executable,
            verbose: self.verbose,
            init_script: self.init_script,
            init_script_file: self.init_script_file,
            dom_events: self.dom_events,
            network_events: self.network_events,
            console_events: self.console_events,
            max_instances: self.max_instances,
            command_capacity: self.command_capacity,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay: self.reconnect_base_delay,
            reconnect_max_delay: self.reconnect_max_delay,
            max_incoming_frame_size: self.max_incoming_frame_size,
            max_outgoing_frame_size: self.max_outgoing_frame_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.command_capacity, COMMAND_CAPACITY);
        assert_eq!(config.command_timeout, Duration::from_millis(REQUEST_TIMEOUT));
        assert_eq!(config.http_base(), "http://127.0.0.1:9222");
    }

    #[test]
    fn builder_rejects_conflicting_init_scripts() {
        let err = Config::builder()
            .init_script("1+1")
            .init_script_file("/tmp/init.js")
            .build()
            .unwrap_err();
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn builder_rejects_zero_capacity() {
        assert!(Config::builder().command_capacity(0).build().is_err());
        assert!(Config::builder().max_instances(0).build().is_err());
        assert!(Config::builder().max_instances(64).build().is_err());
    }
}
