//! A headless-browser control client for the Chrome DevTools Protocol.
//!
//! The crate drives Chromium-family browsers over their debugging
//! endpoint: it supervises browser child processes, keeps a websocket to
//! the active target, multiplexes concurrent commands and unsolicited
//! events over that socket, and exposes typed wrappers for the Runtime,
//! Page, DOM, Fetch and Network domains.
//!
//! The moving parts:
//!
//! - [`browser::Registry`] launches and supervises browser children and
//!   hands out their debug endpoints.
//! - [`conn::Connection`] is the websocket transport: handshake, frame
//!   codec, masking, ping/pong.
//! - [`bus::CommandBus`] correlates submissions with responses by id and
//!   enforces per-command timeouts.
//! - [`handler::Handler`] is the background task that moves bytes:
//!   spawn it, or nothing happens.
//! - [`client::CdpClient`] is the handle everything above hangs off.
//!
//! ```no_run
//! use cdpmux::{BrowserConfig, CdpClient, Config};
//! use cdpmux::browser::{first_page_target, Registry};
//!
//! # async fn run() -> Result<(), cdpmux::CdpError> {
//! let config = Config::default();
//! let registry = Registry::new(&config);
//! let instance = registry.launch(BrowserConfig::default()).await?;
//!
//! let targets = registry.targets(instance).await?;
//! let target = first_page_target(&targets).expect("a fresh browser has a page");
//!
//! let (client, handler) = CdpClient::connect(config, target.target_path()).await?;
//! tokio::spawn(handler.run());
//!
//! client.navigate("https://example.com/").await?;
//! println!("{}", client.inner_text("h1").await?);
//!
//! client.shutdown().await;
//! registry.kill(instance, false).await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod bus;
pub mod client;
pub mod cmd;
pub mod config;
pub mod conn;
pub mod detection;
pub mod error;
pub mod handler;
pub mod subscribe;
mod utils;
mod ws;

pub use browser::{BrowserConfig, InstanceSnapshot, InstanceStatus, Registry};
pub use bus::BusStats;
pub use client::{CdpClient, ConnectionState, Hooks};
pub use config::Config;
pub use error::CdpError;
pub use handler::Handler;
pub use subscribe::EventStream;

pub use cdpmux_types as types;
