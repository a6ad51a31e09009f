use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use futures::channel::oneshot;
use tokio::sync::Notify;

use cdpmux_types::{CallId, CommandOutcome, FailureKind, MethodCall, Response};

use crate::error::{CdpError, Result};

/// A command accepted by the bus but not yet written to the wire.
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub call: MethodCall,
    responder: Option<oneshot::Sender<CommandOutcome>>,
    timeout: Duration,
}

#[derive(Debug)]
struct InFlight {
    responder: Option<oneshot::Sender<CommandOutcome>>,
    timeout: Duration,
    sent_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    timed_out: u64,
}

#[derive(Debug)]
struct BusInner {
    next_id: usize,
    /// Submission order is write order.
    queued: VecDeque<QueuedCommand>,
    in_flight: FnvHashMap<CallId, InFlight>,
    counters: Counters,
}

/// Snapshot of bus activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Commands queued or awaiting their response.
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Bounded table of in-flight commands, correlating submissions with
/// responses by id.
///
/// Submissions are accepted from any task; a single handler drains the
/// queue to the wire and feeds responses back. Each command resolves its
/// oneshot exactly once: completed, failed, or timed out. A response whose
/// id matches no live entry is discarded.
#[derive(Debug)]
pub struct CommandBus {
    capacity: usize,
    inner: Mutex<BusInner>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl CommandBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(BusInner {
                next_id: 1,
                queued: VecDeque::new(),
                in_flight: FnvHashMap::default(),
                counters: Counters::default(),
            }),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Queues a request and hands back its id plus the receiver its
    /// terminal outcome arrives on. Fails fast with `QueueFull` when the
    /// table is at capacity; no slot is consumed in that case.
    pub fn submit(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<(CallId, oneshot::Receiver<CommandOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.enqueue(method, params, timeout, Some(tx))?;
        Ok((id, rx))
    }

    /// Queues a request nobody waits on (domain enables, init scripts).
    /// The response is still consumed and counted when it arrives.
    pub(crate) fn submit_internal(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<CallId> {
        self.enqueue(method, params, timeout, None)
    }

    fn enqueue(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        timeout: Duration,
        responder: Option<oneshot::Sender<CommandOutcome>>,
    ) -> Result<CallId> {
        if self.is_shutdown() {
            return Err(CdpError::Shutdown);
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.queued.len() + inner.in_flight.len() >= self.capacity {
            return Err(CdpError::QueueFull);
        }
        let id = CallId::new(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.queued.push_back(QueuedCommand {
            call: MethodCall::new(id, method, params),
            responder,
            timeout,
        });
        drop(inner);
        self.notify.notify_one();
        Ok(id)
    }

    /// Next command to write, in submission order.
    pub(crate) fn pop_queued(&self) -> Option<QueuedCommand> {
        self.inner.lock().unwrap().queued.pop_front()
    }

    /// Records a successful write: the command now awaits its response.
    pub(crate) fn mark_sent(&self, cmd: QueuedCommand) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.insert(
            cmd.call.id,
            InFlight {
                responder: cmd.responder,
                timeout: cmd.timeout,
                sent_at: Instant::now(),
            },
        );
    }

    /// Retires a popped command that never made it onto the wire.
    pub(crate) fn fail_command(&self, cmd: QueuedCommand, kind: FailureKind, message: &str) {
        self.inner.lock().unwrap().counters.failed += 1;
        resolve(
            cmd.responder,
            CommandOutcome::Failed {
                kind,
                message: message.to_string(),
            },
        );
    }

    /// Completes the in-flight command matching the response id. Returns
    /// `false` when the id is unknown (already retired); such responses
    /// are discarded.
    pub(crate) fn complete(&self, resp: Response) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.in_flight.remove(&resp.id) else {
            return false;
        };
        inner.counters.completed += 1;
        drop(inner);
        resolve(entry.responder, CommandOutcome::Completed(resp));
        true
    }

    /// Retires every in-flight command whose deadline has passed. A
    /// response arriving for a retired id is discarded later.
    pub(crate) fn sweep_timeouts(&self) -> Vec<CallId> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<CallId> = inner
            .in_flight
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.sent_at) >= entry.timeout)
            .map(|(id, _)| *id)
            .collect();
        let mut resolved = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = inner.in_flight.remove(&id) {
                inner.counters.timed_out += 1;
                resolved.push((entry.responder, id));
            }
        }
        drop(inner);
        resolved
            .into_iter()
            .map(|(responder, id)| {
                resolve(responder, CommandOutcome::TimedOut);
                id
            })
            .collect()
    }

    /// Fails every non-terminal command, queued or in flight. Used when
    /// the transport dies and on shutdown; nothing is resubmitted.
    pub(crate) fn fail_all(&self, kind: FailureKind, message: &str) {
        let (queued, in_flight) = {
            let mut inner = self.inner.lock().unwrap();
            let queued: Vec<_> = inner.queued.drain(..).collect();
            let in_flight: Vec<_> = inner.in_flight.drain().collect();
            inner.counters.failed += (queued.len() + in_flight.len()) as u64;
            (queued, in_flight)
        };
        for cmd in queued {
            resolve(
                cmd.responder,
                CommandOutcome::Failed {
                    kind,
                    message: message.to_string(),
                },
            );
        }
        for (_, entry) in in_flight {
            resolve(
                entry.responder,
                CommandOutcome::Failed {
                    kind,
                    message: message.to_string(),
                },
            );
        }
    }

    /// Flips the shutdown flag, drains all remaining commands as failed
    /// and wakes the handler so it can exit. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fail_all(FailureKind::Shutdown, "client is shutting down");
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolves once new work is queued or shutdown is requested.
    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn stats(&self) -> BusStats {
        let inner = self.inner.lock().unwrap();
        BusStats {
            pending: inner.queued.len() + inner.in_flight.len(),
            completed: inner.counters.completed,
            failed: inner.counters.failed,
            timed_out: inner.counters.timed_out,
        }
    }
}

fn resolve(responder: Option<oneshot::Sender<CommandOutcome>>, outcome: CommandOutcome) {
    if let Some(tx) = responder {
        // A dropped receiver means the caller stopped waiting; the
        // outcome is still terminal.
        let _ = tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus() -> CommandBus {
        CommandBus::new(4)
    }

    fn pump(bus: &CommandBus) -> CallId {
        let cmd = bus.pop_queued().unwrap();
        let id = cmd.call.id;
        bus.mark_sent(cmd);
        id
    }

    fn response(id: CallId) -> Response {
        Response {
            id,
            result: Some(json!({"ok": true})),
            error: None,
        }
    }

    #[test]
    fn completes_exactly_once_per_id() {
        let bus = bus();
        let (id, mut rx) = bus
            .submit("Runtime.evaluate".into(), json!({}), Duration::from_secs(1))
            .unwrap();
        assert_eq!(pump(&bus), id);

        assert!(bus.complete(response(id)));
        match rx.try_recv().unwrap().unwrap() {
            CommandOutcome::Completed(resp) => assert_eq!(resp.id, id),
            other => panic!("unexpected outcome {other:?}"),
        }

        // A duplicate response finds no live entry.
        assert!(!bus.complete(response(id)));
        assert_eq!(bus.stats().completed, 1);
    }

    #[test]
    fn queue_full_fails_fast_without_a_slot() {
        let bus = bus();
        for _ in 0..4 {
            bus.submit("Page.enable".into(), json!({}), Duration::from_secs(1))
                .unwrap();
        }
        let err = bus
            .submit("Page.enable".into(), json!({}), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, CdpError::QueueFull));
        assert_eq!(bus.stats().pending, 4);

        // Retiring one frees a slot.
        let id = pump(&bus);
        bus.complete(response(id));
        bus.submit("Page.enable".into(), json!({}), Duration::from_secs(1))
            .unwrap();
    }

    #[test]
    fn ids_are_monotonic_and_in_submission_order() {
        let bus = bus();
        let (a, _rx_a) = bus
            .submit("Runtime.enable".into(), json!({}), Duration::from_secs(1))
            .unwrap();
        let (b, _rx_b) = bus
            .submit("Page.enable".into(), json!({}), Duration::from_secs(1))
            .unwrap();
        assert!(b.as_usize() > a.as_usize());

        assert_eq!(bus.pop_queued().unwrap().call.id, a);
        assert_eq!(bus.pop_queued().unwrap().call.id, b);
    }

    #[test]
    fn timeout_retires_and_late_response_is_discarded() {
        let bus = bus();
        let (id, mut rx) = bus
            .submit("Runtime.evaluate".into(), json!({}), Duration::ZERO)
            .unwrap();
        pump(&bus);

        let expired = bus.sweep_timeouts();
        assert_eq!(expired, vec![id]);
        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            CommandOutcome::TimedOut
        ));

        // The id is consumed; a late response must not reach anyone.
        assert!(!bus.complete(response(id)));
        let stats = bus.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn fail_all_covers_queued_and_in_flight() {
        let bus = bus();
        let (_sent, mut rx_sent) = bus
            .submit("Runtime.evaluate".into(), json!({}), Duration::from_secs(1))
            .unwrap();
        pump(&bus);
        let (_queued, mut rx_queued) = bus
            .submit("Page.navigate".into(), json!({}), Duration::from_secs(1))
            .unwrap();

        bus.fail_all(FailureKind::Transport, "connection reset");

        for rx in [&mut rx_sent, &mut rx_queued] {
            match rx.try_recv().unwrap().unwrap() {
                CommandOutcome::Failed { kind, message } => {
                    assert_eq!(kind, FailureKind::Transport);
                    assert!(message.contains("connection reset"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(bus.stats().pending, 0);
        assert_eq!(bus.stats().failed, 2);
    }

    #[test]
    fn shutdown_rejects_new_submissions() {
        let bus = bus();
        let (_id, mut rx) = bus
            .submit("Runtime.evaluate".into(), json!({}), Duration::from_secs(1))
            .unwrap();
        bus.shutdown();

        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            CommandOutcome::Failed {
                kind: FailureKind::Shutdown,
                ..
            }
        ));
        assert!(matches!(
            bus.submit("Page.enable".into(), json!({}), Duration::from_secs(1)),
            Err(CdpError::Shutdown)
        ));
        // Idempotent.
        bus.shutdown();
    }
}
