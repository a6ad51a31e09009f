use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use cdpmux_types::{EventMessage, FailureKind, Message, Response};

use crate::bus::CommandBus;
use crate::client::{ClientShared, Hooks};
use crate::config::Config;
use crate::conn::Connection;
use crate::error::{CdpError, Result};

/// Interval between transport polls and timeout sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Targets whose id carries this prefix get `Runtime.enable` replayed on
/// every reconnect.
const PAGE_TARGET_PREFIX: &str = "page/";

/// The background task driving one connection: drains submitted commands
/// to the wire in submission order, demultiplexes responses and events,
/// sweeps timeouts, and reconnects with backoff when the transport dies.
///
/// Exactly one handler runs per client; spawn it and poll it to
/// completion:
///
/// ```no_run
/// # use cdpmux::{CdpClient, Config};
/// # async fn run() -> Result<(), cdpmux::CdpError> {
/// let (client, handler) = CdpClient::connect(Config::default(), "page/ABC123").await?;
/// let task = tokio::spawn(handler.run());
/// # Ok(())
/// # }
/// ```
#[must_use = "the handler does nothing unless its run() future is polled"]
pub struct Handler {
    conn: Connection<EventMessage>,
    shared: Arc<ClientShared>,
    hooks: Hooks,
    config: Config,
    target_id: String,
    sweep: Interval,
}

impl Handler {
    pub(crate) fn new(
        conn: Connection<EventMessage>,
        shared: Arc<ClientShared>,
        hooks: Hooks,
        config: Config,
        target_id: String,
    ) -> Self {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            conn,
            shared,
            hooks,
            config,
            target_id,
            sweep,
        }
    }

    fn bus(&self) -> &CommandBus {
        &self.shared.bus
    }

    /// Runs until shutdown is requested or the reconnect budget is spent.
    pub async fn run(mut self) {
        self.after_connect(true);
        loop {
            match self.drive().await {
                Ok(()) => break,
                Err(err) => {
                    warn!(error = %err, "transport failed");
                    self.on_disconnected(&err);
                    if let Err(err) = self.reconnect_with_backoff().await {
                        warn!(error = %err, "giving up on the connection");
                        self.emit_error(&err);
                        self.bus().shutdown();
                        break;
                    }
                }
            }
        }
        self.shared.state.lock().unwrap().connected = false;
        debug!("handler exited");
    }

    /// One connection's lifetime: returns `Ok` on shutdown, `Err` when the
    /// transport needs to be re-established.
    async fn drive(&mut self) -> Result<()> {
        loop {
            if self.bus().is_shutdown() {
                return Ok(());
            }
            self.flush_queued().await?;

            let shared = Arc::clone(&self.shared);
            tokio::select! {
                _ = shared.bus.notified() => {}
                _ = self.sweep.tick() => {
                    for id in self.bus().sweep_timeouts() {
                        debug!(%id, "command timed out");
                    }
                }
                msg = self.conn.next() => match msg {
                    Some(Ok(Message::Response(resp))) => self.on_response(resp),
                    Some(Ok(Message::Event(event))) => self.on_event(event),
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(CdpError::Transport(
                            "connection closed by peer".to_string(),
                        ))
                    }
                },
            }
        }
    }

    /// Writes every queued command in submission order. An oversized
    /// payload fails only its own command; any other write error kills the
    /// connection.
    async fn flush_queued(&mut self) -> Result<()> {
        while let Some(cmd) = self.bus().pop_queued() {
            let raw = match serde_json::to_string(&cmd.call) {
                Ok(raw) => raw,
                Err(err) => {
                    self.bus()
                        .fail_command(cmd, FailureKind::Transport, &err.to_string());
                    continue;
                }
            };
            debug!(id = %cmd.call.id, method = %cmd.call.method, "sending command");
            match self.send_with_retry(&raw).await {
                Ok(()) => self.bus().mark_sent(cmd),
                Err(CdpError::InvalidArgs(msg)) => {
                    self.bus().fail_command(cmd, FailureKind::Transport, &msg);
                }
                Err(err) => {
                    self.bus()
                        .fail_command(cmd, FailureKind::Transport, &err.to_string());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// One bounded retry on a transient write error.
    async fn send_with_retry(&mut self, raw: &str) -> Result<()> {
        match self.conn.send(raw).await {
            Ok(()) => Ok(()),
            Err(CdpError::Io(err)) if is_transient(&err) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.conn.send(raw).await
            }
            Err(err) => Err(err),
        }
    }

    fn on_response(&mut self, resp: Response) {
        let id = resp.id;
        self.touch();
        if !self.bus().complete(resp) {
            debug!(%id, "discarding response for a retired command");
        }
    }

    fn on_event(&mut self, event: EventMessage) {
        self.touch();
        let event = Arc::new(event);
        if let Some(on_event) = &self.hooks.on_event {
            on_event(&event);
        }
        self.shared.subscriptions.dispatch(&event);
    }

    fn touch(&self) {
        self.shared.state.lock().unwrap().last_activity = Some(std::time::Instant::now());
    }

    fn emit_error(&self, err: &CdpError) {
        if let Some(on_error) = &self.hooks.on_error {
            on_error(&err.to_string());
        }
    }

    fn on_disconnected(&mut self, err: &CdpError) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.connected = false;
            state.runtime_ready = false;
            state.page_ready = false;
        }
        self.emit_error(err);
        if let Some(on_disconnect) = &self.hooks.on_disconnect {
            on_disconnect();
        }
        // Nothing is resubmitted across a reconnect; the caller decides
        // what is safe to retry.
        self.bus().fail_all(FailureKind::Transport, &err.to_string());
    }

    fn after_connect(&mut self, initial: bool) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.connected = true;
            state.target_id = self.target_id.clone();
            state.reconnect_attempts = 0;
            state.last_activity = Some(std::time::Instant::now());
        }
        if let Some(on_connect) = &self.hooks.on_connect {
            on_connect();
        }
        if self.target_id.starts_with(PAGE_TARGET_PREFIX) && !initial {
            // The first Runtime.enable goes out with the connect-time
            // setup; replays only happen on reconnect.
            self.enable_runtime();
        }
    }

    fn enable_runtime(&mut self) {
        let enqueue = self.bus().submit_internal(
            "Runtime.enable".into(),
            serde_json::json!({}),
            self.config.command_timeout,
        );
        match enqueue {
            Ok(_) => self.shared.state.lock().unwrap().runtime_ready = true,
            Err(err) => warn!(error = %err, "failed to queue Runtime.enable"),
        }
    }

    /// Re-dials the endpoint with exponentially growing delays until it
    /// answers or the attempt budget is exhausted.
    async fn reconnect_with_backoff(&mut self) -> Result<()> {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;
        loop {
            if self.bus().is_shutdown() {
                return Err(CdpError::Shutdown);
            }
            attempt += 1;
            self.shared.state.lock().unwrap().reconnect_attempts = attempt;

            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                attempt,
                self.config.reconnect_max_delay,
            );
            debug!(attempt, ?delay, "reconnecting");
            tokio::time::sleep(delay).await;

            match Connection::connect(
                &self.config.host,
                self.config.port,
                &self.target_id,
                self.config.connect_timeout,
                self.config.max_incoming_frame_size,
                self.config.max_outgoing_frame_size,
            )
            .await
            {
                Ok(conn) => {
                    self.conn = conn;
                    self.after_connect(false);
                    return Ok(());
                }
                Err(err) if attempt >= max_attempts => return Err(err),
                Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
            }
        }
    }
}

/// Delay before reconnect `attempt` (1-based): `base * 2^(attempt - 1)`,
/// capped.
pub(crate) fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(1u32 << exp);
    delay.min(cap)
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(30);
        let delays: Vec<u64> = (1..=5)
            .map(|n| backoff_delay(base, n, cap).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 10, cap), cap);
        // No overflow far past the cap.
        assert_eq!(backoff_delay(base, u32::MAX, cap), cap);
    }

    #[test]
    fn backoff_total_is_bounded() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(30);
        let attempts = 5u32;
        let total: Duration = (1..=attempts).map(|n| backoff_delay(base, n, cap)).sum();
        let geometric = base * (2u32.pow(attempts) - 1);
        let capped = cap * attempts;
        assert!(total <= geometric.min(capped));
    }
}
