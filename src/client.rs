use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::debug;

use cdpmux_types::{
    CommandOutcome, CommandResponse, Method, Request, Response,
};

use crate::browser::Registry;
use crate::bus::{BusStats, CommandBus};
use crate::cmd::runtime::{CallArgument, CallFunctionOnParams, RemoteObject, RemoteObjectId};
use crate::cmd::{dom, page, runtime};
use crate::config::Config;
use crate::conn::Connection;
use crate::error::{CdpError, Result};
use crate::handler::Handler;
use crate::subscribe::{EventStream, Subscriptions};
use crate::utils;

/// State of the one connection a client drives.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connected: bool,
    /// Opaque target path, e.g. `page/<id>`. Non-empty while connected.
    pub target_id: String,
    pub last_activity: Option<Instant>,
    pub reconnect_attempts: u32,
    /// The Runtime domain has been enabled on the current connection.
    pub runtime_ready: bool,
    /// The Page domain has been enabled on the current connection.
    pub page_ready: bool,
}

impl ConnectionState {
    fn new(target_id: String) -> Self {
        Self {
            connected: false,
            target_id,
            last_activity: None,
            reconnect_attempts: 0,
            runtime_ready: false,
            page_ready: false,
        }
    }
}

/// Lifecycle callbacks a host can hang on the client. All of them run on
/// the handler task and must not block.
#[derive(Default)]
pub struct Hooks {
    pub(crate) on_connect: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_disconnect: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_event: Option<Box<dyn Fn(&cdpmux_types::EventMessage) + Send + Sync>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Box::new(hook));
        self
    }

    pub fn on_disconnect(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_event(
        mut self,
        hook: impl Fn(&cdpmux_types::EventMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Box::new(hook));
        self
    }
}

/// Everything the client and its handler share.
#[derive(Debug)]
pub(crate) struct ClientShared {
    pub bus: CommandBus,
    pub subscriptions: Subscriptions,
    pub state: Mutex<ConnectionState>,
}

/// The process-wide runtime handle: owns the configuration, the command
/// bus, the event subscriptions and the process registry, and talks to
/// one target through the spawned [`Handler`].
///
/// ```no_run
/// # use cdpmux::{CdpClient, Config};
/// # async fn run() -> Result<(), cdpmux::CdpError> {
/// let (client, handler) = CdpClient::connect(Config::default(), "page/ABC123").await?;
/// tokio::spawn(handler.run());
///
/// let two = client.get_value("1 + 1").await?;
/// assert_eq!(two, "2");
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CdpClient {
    config: Config,
    shared: Arc<ClientShared>,
    registry: Arc<Registry>,
    enabled_domains: Mutex<HashSet<String>>,
}

impl CdpClient {
    /// Connects to `/devtools/<target_id>` on the configured endpoint and
    /// returns the client plus the handler future to spawn.
    pub async fn connect(config: Config, target_id: impl Into<String>) -> Result<(Self, Handler)> {
        Self::connect_with_hooks(config, target_id, Hooks::default()).await
    }

    pub async fn connect_with_hooks(
        config: Config,
        target_id: impl Into<String>,
        hooks: Hooks,
    ) -> Result<(Self, Handler)> {
        let target_id = target_id.into();
        if target_id.is_empty() {
            return Err(CdpError::InvalidArgs("target id must not be empty".to_string()));
        }

        let conn = Connection::connect(
            &config.host,
            config.port,
            &target_id,
            config.connect_timeout,
            config.max_incoming_frame_size,
            config.max_outgoing_frame_size,
        )
        .await?;

        let shared = Arc::new(ClientShared {
            bus: CommandBus::new(config.command_capacity),
            subscriptions: Subscriptions::default(),
            state: Mutex::new(ConnectionState::new(target_id.clone())),
        });
        let registry = Arc::new(Registry::new(&config));

        let client = Self {
            config: config.clone(),
            shared: Arc::clone(&shared),
            registry,
            enabled_domains: Mutex::new(HashSet::new()),
        };
        let handler = Handler::new(conn, shared, hooks, config, target_id.clone());

        client.connect_setup(&target_id).await?;
        Ok((client, handler))
    }

    /// Connect-time submissions: `Runtime.enable` for page targets, the
    /// init script, and the configured event domains. They go out ahead
    /// of anything the caller submits.
    async fn connect_setup(&self, target_id: &str) -> Result<()> {
        if target_id.starts_with("page/") {
            self.queue_enable("Runtime")?;
        }
        if let Some(source) = self.config.resolve_init_script().await? {
            let params = page::AddScriptToEvaluateOnNewDocumentParams::new(source);
            self.shared.bus.submit_internal(
                page::AddScriptToEvaluateOnNewDocumentParams::IDENTIFIER.into(),
                serde_json::to_value(&params)?,
                self.config.command_timeout,
            )?;
        }
        if self.config.dom_events {
            self.queue_enable("DOM")?;
        }
        if self.config.network_events {
            self.queue_enable("Network")?;
        }
        if self.config.console_events {
            // Console output arrives as Runtime.consoleAPICalled.
            self.queue_enable("Runtime")?;
        }
        Ok(())
    }

    /// Queues `<domain>.enable` once; repeat calls are no-ops.
    fn queue_enable(&self, domain: &str) -> Result<()> {
        if !self.enabled_domains.lock().unwrap().insert(domain.to_string()) {
            return Ok(());
        }
        self.shared.bus.submit_internal(
            Cow::Owned(format!("{domain}.enable")),
            json!({}),
            self.config.command_timeout,
        )?;
        self.mark_domain_ready(domain);
        Ok(())
    }

    fn mark_domain_ready(&self, domain: &str) {
        let mut state = self.shared.state.lock().unwrap();
        match domain {
            "Runtime" => state.runtime_ready = true,
            "Page" => state.page_ready = true,
            _ => {}
        }
    }

    /// Executes a typed command with the configured timeout.
    pub async fn execute<T: cdpmux_types::Command>(
        &self,
        cmd: T,
    ) -> Result<CommandResponse<T::Response>> {
        self.execute_with_timeout(cmd, self.config.command_timeout)
            .await
    }

    pub async fn execute_with_timeout<T: cdpmux_types::Command>(
        &self,
        cmd: T,
        timeout: Duration,
    ) -> Result<CommandResponse<T::Response>> {
        let method = cmd.identifier();
        let params = serde_json::to_value(&cmd)?;
        let resp = self.submit_raw(method.clone(), params, timeout).await?;
        to_command_response::<T>(resp, method)
    }

    /// Submits a raw method call and returns the undecoded response,
    /// protocol error included. The escape hatch for hosts driving
    /// methods without a typed wrapper.
    pub async fn execute_raw(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: serde_json::Value,
    ) -> Result<Response> {
        self.submit_raw(method.into(), params, self.config.command_timeout)
            .await
    }

    async fn submit_raw(
        &self,
        method: Cow<'static, str>,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<Response> {
        let (id, rx) = self.shared.bus.submit(method, params, timeout)?;
        debug!(%id, "command submitted");
        let outcome = rx.await?;
        match outcome {
            CommandOutcome::Completed(resp) => Ok(resp),
            other => Err(CdpError::from_outcome(other, timeout)),
        }
    }

    /// Sends `<domain>.enable` and records it; enabling a domain twice
    /// sends nothing the second time.
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        if self.enabled_domains.lock().unwrap().contains(domain) {
            return Ok(());
        }
        self.execute(Request::new(format!("{domain}.enable"), json!({})))
            .await?;
        self.enabled_domains
            .lock()
            .unwrap()
            .insert(domain.to_string());
        self.mark_domain_ready(domain);
        Ok(())
    }

    /// Subscribes to an event by exact method name.
    pub fn event_listener(&self, method: impl Into<Cow<'static, str>>) -> EventStream {
        self.shared.subscriptions.subscribe(method)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().unwrap().clone()
    }

    pub fn stats(&self) -> BusStats {
        self.shared.bus.stats()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stops the handler, drains every pending command as failed, and
    /// terminates owned browser instances, graceful first. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        debug!("shutting down client");
        self.shared.bus.shutdown();
        self.registry.shutdown().await;
    }

    // ---- Runtime conveniences -------------------------------------------

    /// Evaluates an expression and returns the mirror object.
    pub async fn evaluate(
        &self,
        params: impl Into<runtime::EvaluateParams>,
    ) -> Result<RemoteObject> {
        let resp = self.execute(params.into()).await?;
        if let Some(details) = resp.result.exception_details {
            return Err(CdpError::JavascriptException(details.text));
        }
        Ok(resp.result.result)
    }

    /// Evaluates by value and renders `result.value` as a string.
    pub async fn get_value(&self, expression: impl Into<String>) -> Result<String> {
        let object = self
            .evaluate(runtime::EvaluateParams::by_value(expression))
            .await?;
        Ok(value_to_string(object.value.unwrap_or(serde_json::Value::Null)))
    }

    // ---- Page conveniences ----------------------------------------------

    pub async fn navigate(&self, url: impl Into<String>) -> Result<page::NavigateReturns> {
        let url = url.into();
        url::Url::parse(&url)?;
        Ok(self.execute(page::NavigateParams::new(url)).await?.result)
    }

    /// Captures a PNG screenshot and decodes the payload.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let resp = self.execute(page::CaptureScreenshotParams::png()).await?;
        utils::decode_base64(resp.result.data.as_ref())
    }

    /// Registers a script evaluated on every new document.
    pub async fn add_init_script(&self, source: impl Into<String>) -> Result<String> {
        let resp = self
            .execute(page::AddScriptToEvaluateOnNewDocumentParams::new(source))
            .await?;
        Ok(resp.result.identifier)
    }

    // ---- DOM conveniences -----------------------------------------------

    /// Resolves the first element matching `selector` to a remote object
    /// id, via document → query → resolve.
    pub async fn select_object_id(&self, selector: &str) -> Result<RemoteObjectId> {
        let root = self
            .execute(dom::GetDocumentParams::with_depth(1))
            .await?
            .result
            .root;
        let found = self
            .execute(dom::QuerySelectorParams::new(root.node_id, selector))
            .await?;
        if found.result.node_id.is_none() {
            return Err(CdpError::InvalidArgs(format!(
                "no element matches selector {selector:?}"
            )));
        }
        let resolved = self
            .execute(dom::ResolveNodeParams::new(found.result.node_id))
            .await?;
        resolved
            .result
            .object
            .object_id
            .ok_or_else(|| CdpError::msg("node did not resolve to a remote object"))
    }

    async fn call_on(
        &self,
        object_id: RemoteObjectId,
        declaration: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<RemoteObject> {
        let mut params = CallFunctionOnParams::new(object_id, declaration).by_value();
        for argument in arguments {
            params = params.argument(argument);
        }
        let resp = self.execute(params).await?;
        if let Some(details) = resp.result.exception_details {
            return Err(CdpError::JavascriptException(details.text));
        }
        Ok(resp.result.result)
    }

    async fn call_on_selector(
        &self,
        selector: &str,
        declaration: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<RemoteObject> {
        let object_id = self.select_object_id(selector).await?;
        self.call_on(object_id, declaration, arguments).await
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        self.call_on_selector(selector, "function() { this.click(); }", Vec::new())
            .await
            .map(|_| ())
    }

    /// Sets an input's value and fires the input/change events the page
    /// listens for.
    pub async fn set_value(&self, selector: &str, value: impl Into<String>) -> Result<()> {
        self.call_on_selector(
            selector,
            "function(value) { \
                this.value = value; \
                this.dispatchEvent(new Event('input', { bubbles: true })); \
                this.dispatchEvent(new Event('change', { bubbles: true })); \
             }",
            vec![CallArgument::value(value.into().into())],
        )
        .await
        .map(|_| ())
    }

    pub async fn inner_text(&self, selector: &str) -> Result<String> {
        let object = self
            .call_on_selector(selector, "function() { return this.innerText; }", Vec::new())
            .await?;
        Ok(value_to_string(object.value.unwrap_or(serde_json::Value::Null)))
    }

    /// `innerText` of every element matching `selector`.
    pub async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let document = self.document_object_id().await?;
        let object = self
            .call_on(
                document,
                "function(selector) { \
                    return Array.from(this.querySelectorAll(selector)) \
                        .map(el => el.innerText); \
                 }",
                vec![CallArgument::value(selector.into())],
            )
            .await?;
        Ok(serde_json::from_value(
            object.value.unwrap_or_else(|| json!([])),
        )?)
    }

    /// The matching element's attributes as a JSON object.
    pub async fn attributes_json(&self, selector: &str) -> Result<serde_json::Value> {
        let object = self
            .call_on_selector(
                selector,
                "function() { \
                    const attrs = {}; \
                    for (const attr of this.attributes) { attrs[attr.name] = attr.value; } \
                    return attrs; \
                 }",
                Vec::new(),
            )
            .await?;
        Ok(object.value.unwrap_or(serde_json::Value::Null))
    }

    async fn document_object_id(&self) -> Result<RemoteObjectId> {
        let root = self
            .execute(dom::GetDocumentParams::with_depth(0))
            .await?
            .result
            .root;
        let resolved = self.execute(dom::ResolveNodeParams::new(root.node_id)).await?;
        resolved
            .result
            .object
            .object_id
            .ok_or_else(|| CdpError::msg("document did not resolve to a remote object"))
    }
}

/// Decodes a raw response into the command's typed result; a protocol
/// error in the response surfaces as an error.
pub(crate) fn to_command_response<T: cdpmux_types::Command>(
    resp: Response,
    method: Cow<'static, str>,
) -> Result<CommandResponse<T::Response>> {
    if let Some(result) = resp.result {
        let result = serde_json::from_value(result)?;
        Ok(CommandResponse {
            id: resp.id,
            result,
            method,
        })
    } else if let Some(error) = resp.error {
        Err(error.into())
    } else {
        Err(CdpError::NoResponse)
    }
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdpmux_types::CallId;

    #[test]
    fn value_rendering() {
        assert_eq!(value_to_string(json!("text")), "text");
        assert_eq!(value_to_string(json!(2)), "2");
        assert_eq!(value_to_string(json!(null)), "null");
        assert_eq!(value_to_string(json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn protocol_error_surfaces_from_response() {
        let resp = Response {
            id: CallId::new(4),
            result: None,
            error: Some(cdpmux_types::Error {
                code: -32000,
                message: "Cannot find context".to_string(),
            }),
        };
        let err = to_command_response::<runtime::EvaluateParams>(resp, "Runtime.evaluate".into())
            .unwrap_err();
        assert!(matches!(err, CdpError::Chrome(_)));
        assert!(err.to_string().contains("Cannot find context"));
    }

    #[test]
    fn empty_response_is_an_error() {
        let resp = Response {
            id: CallId::new(5),
            result: None,
            error: None,
        };
        assert!(matches!(
            to_command_response::<runtime::EvaluateParams>(resp, "Runtime.evaluate".into()),
            Err(CdpError::NoResponse)
        ));
    }
}
