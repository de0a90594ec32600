//! XMTP bridge library.
//!
//! Consumes `{ethereumAddress, message}` requests from a pub/sub bus and
//! delivers each message to the recipient as a direct message on the
//! messaging network. Exposed as a library for tests and embedding; the
//! `xmtpbridge` binary wires it to Redis and the process environment.

pub mod bus;
pub mod client;
pub mod config;
pub mod crypto;
pub mod listener;
pub mod network;
pub mod relay;
