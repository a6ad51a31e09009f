use std::borrow::Cow;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::Stream;

use cdpmux_types::EventMessage;

/// Routes unsolicited protocol events to their subscribers.
///
/// Subscribers are keyed by exact method name and receive events in
/// registration order, each on its own unbounded channel so a slow
/// consumer never stalls the handler. Dropping an [`EventStream`]
/// unsubscribes it; dead listeners are pruned on the next dispatch.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    subs: Mutex<HashMap<Cow<'static, str>, Vec<EventSubscription>>>,
}

#[derive(Debug)]
struct EventSubscription {
    listener: UnboundedSender<Arc<EventMessage>>,
}

impl Subscriptions {
    pub fn subscribe(&self, method: impl Into<Cow<'static, str>>) -> EventStream {
        let (tx, rx) = unbounded();
        self.subs
            .lock()
            .unwrap()
            .entry(method.into())
            .or_default()
            .push(EventSubscription { listener: tx });
        EventStream { events: rx }
    }

    /// Fans the event out to every live subscriber of its method.
    pub fn dispatch(&self, event: &Arc<EventMessage>) {
        let mut subs = self.subs.lock().unwrap();
        let Some(listeners) = subs.get_mut(event.method.as_ref()) else {
            return;
        };
        listeners.retain(|sub| sub.listener.unbounded_send(Arc::clone(event)).is_ok());
        if listeners.is_empty() {
            subs.remove(event.method.as_ref());
        }
    }

    #[cfg(test)]
    fn listener_count(&self, method: &str) -> usize {
        self.subs.lock().unwrap().get(method).map_or(0, Vec::len)
    }
}

/// The receiver half of an event subscription.
#[derive(Debug)]
pub struct EventStream {
    events: UnboundedReceiver<Arc<EventMessage>>,
}

impl Stream for EventStream {
    type Item = Arc<EventMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use serde_json::json;

    fn event(method: &'static str) -> Arc<EventMessage> {
        Arc::new(EventMessage {
            method: method.into(),
            params: json!({"requestId": "1"}),
        })
    }

    #[tokio::test]
    async fn dispatch_matches_exact_method() {
        let subs = Subscriptions::default();
        let mut network = subs.subscribe("Network.requestWillBeSent");
        let mut page = subs.subscribe("Page.loadEventFired");

        subs.dispatch(&event("Network.requestWillBeSent"));

        let got = network.next().await.unwrap();
        assert_eq!(got.method, "Network.requestWillBeSent");
        assert!(page.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn all_subscribers_of_a_method_receive_the_event() {
        let subs = Subscriptions::default();
        let mut first = subs.subscribe("Fetch.requestPaused");
        let mut second = subs.subscribe("Fetch.requestPaused");

        subs.dispatch(&event("Fetch.requestPaused"));

        // Both receive a handle to the same event.
        let a = first.next().await.unwrap();
        let b = second.next().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn dropped_streams_are_pruned() {
        let subs = Subscriptions::default();
        let stream = subs.subscribe("Page.frameNavigated");
        let _alive = subs.subscribe("Page.frameNavigated");
        assert_eq!(subs.listener_count("Page.frameNavigated"), 2);

        drop(stream);
        subs.dispatch(&event("Page.frameNavigated"));
        assert_eq!(subs.listener_count("Page.frameNavigated"), 1);
    }
}
