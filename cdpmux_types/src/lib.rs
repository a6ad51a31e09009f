//! The protocol envelope spoken between a DevTools client and a Chromium
//! instance: correlated method calls, their responses, and unsolicited
//! events, plus the traits command wrappers implement.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifier correlating a [`MethodCall`] with its [`Response`].
///
/// Ids are allocated from a monotonically increasing counter and must be
/// unique among in-flight calls on a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(usize);

impl CallId {
    pub fn new(id: usize) -> Self {
        CallId(id)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

/// A request sent by the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Identifier for this method call, echoed back by the browser.
    pub id: CallId,
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

impl MethodCall {
    pub fn new(id: CallId, method: Cow<'static, str>, params: serde_json::Value) -> Self {
        Self { id, method, params }
    }
}

impl Method for MethodCall {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

/// A method with a `Domain.method` identifier.
pub trait Method {
    /// The whole string identifier for this method like: `DOM.removeNode`
    fn identifier(&self) -> Cow<'static, str>;

    /// The name of the domain this method belongs to: `DOM`
    fn domain_name(&self) -> Cow<'static, str> {
        self.split().0
    }

    /// The standalone identifier of the method inside the domain: `removeNode`
    fn method_name(&self) -> Cow<'static, str> {
        self.split().1
    }

    /// Tuple of (`domain_name`, `method_name`) : (`DOM`, `removeNode`)
    fn split(&self) -> (Cow<'static, str>, Cow<'static, str>) {
        fn split_parts(id: &str) -> (&str, &str) {
            id.split_once('.').unwrap_or((id, ""))
        }
        match self.identifier() {
            Cow::Borrowed(id) => {
                let (domain, method) = split_parts(id);
                (domain.into(), method.into())
            }
            Cow::Owned(id) => {
                let (domain, method) = split_parts(&id);
                (
                    Cow::Owned(domain.to_string()),
                    Cow::Owned(method.to_string()),
                )
            }
        }
    }
}

/// A protocol command: serializable params plus the type its result
/// deserializes into.
pub trait Command: Serialize + Method {
    type Response: DeserializeOwned + fmt::Debug;
}

/// An unsolicited message produced by an enabled domain.
pub trait Event: Method + DeserializeOwned {}

/// A dynamically assembled command for methods without a typed wrapper,
/// e.g. `Request::new("Network.enable", json!({}))`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<Cow<'static, str>>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl Method for Request {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

impl Command for Request {
    type Response = serde_json::Value;
}

/// A response to a [`MethodCall`] from the browser.
#[derive(Deserialize, Debug, PartialEq, Clone)]
pub struct Response {
    /// Numeric identifier of the matching request.
    pub id: CallId,
    /// The result payload, present on success.
    pub result: Option<serde_json::Value>,
    /// The reason the [`MethodCall`] failed, present on failure.
    pub error: Option<Error>,
}

/// The deserialized result of a successfully completed typed command.
#[derive(Debug, Clone)]
pub struct CommandResponse<T>
where
    T: fmt::Debug,
{
    pub id: CallId,
    pub result: T,
    pub method: Cow<'static, str>,
}

impl<T: fmt::Debug> Deref for CommandResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

pub type CommandResult<T> = Result<CommandResponse<T>, Error>;

/// An event frame: carries `method` and `params` but no `id`.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct EventMessage {
    /// Name of the event method, e.g. `Network.requestWillBeSent`.
    pub method: Cow<'static, str>,
    /// Json params
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Method for EventMessage {
    fn identifier(&self) -> Cow<'static, str> {
        self.method.clone()
    }
}

impl Event for EventMessage {}

/// An incoming frame is either a correlated response or an event.
///
/// Responses always carry an `id`, events never do, which is what the
/// untagged deserialization discriminates on.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum Message<T = EventMessage> {
    Response(Response),
    Event(T),
}

/// A protocol-level error carried inside a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// Error code
    pub code: i64,
    /// Error Message
    pub message: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

/// Why a command reached a terminal state other than completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The transport carrying the command failed before a response arrived.
    Transport,
    /// The client was shut down while the command was still in flight.
    Shutdown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transport => f.write_str("transport"),
            FailureKind::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// The terminal state of a submitted command, delivered exactly once per
/// [`CallId`].
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// A response with a matching id arrived.
    Completed(Response),
    /// The command can no longer complete; the response channel is dead.
    Failed {
        kind: FailureKind,
        message: String,
    },
    /// No response arrived within the per-command deadline. A response
    /// arriving after this fired is discarded.
    TimedOut,
}

/// Represents a binary type as defined in CDP: a base64-encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary(String);

impl Binary {
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for Binary {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for Binary {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Binary> for String {
    fn from(value: Binary) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_call_serializes_flat() {
        let call = MethodCall::new(
            CallId::new(1),
            "Runtime.evaluate".into(),
            json!({"expression": "1+1"}),
        );
        let raw = serde_json::to_string(&call).unwrap();
        assert_eq!(
            raw,
            r#"{"id":1,"method":"Runtime.evaluate","params":{"expression":"1+1"}}"#
        );
    }

    #[test]
    fn message_discriminates_on_id() {
        let msg: Message = serde_json::from_str(r#"{"id":7,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(msg, Message::Response(ref r) if r.id == CallId::new(7)));

        let msg: Message =
            serde_json::from_str(r#"{"method":"Page.loadEventFired","params":{}}"#).unwrap();
        assert!(matches!(msg, Message::Event(ref e) if e.method == "Page.loadEventFired"));
    }

    #[test]
    fn response_error_payload() {
        let msg: Message =
            serde_json::from_str(r#"{"id":3,"error":{"code":-32601,"message":"no such method"}}"#)
                .unwrap();
        match msg {
            Message::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32601);
                assert!(err.to_string().contains("no such method"));
            }
            Message::Event(_) => panic!("parsed as event"),
        }
    }

    #[test]
    fn method_split() {
        let req = Request::new("DOM.querySelector", json!({}));
        assert_eq!(req.domain_name(), "DOM");
        assert_eq!(req.method_name(), "querySelector");
    }
}
