//! Minimal RFC 6455 client-side plumbing: frame codec and upgrade
//! handshake. Only what a DevTools endpoint speaks — text frames plus the
//! ping/pong/close control set.

pub(crate) mod frame;
pub(crate) mod handshake;
