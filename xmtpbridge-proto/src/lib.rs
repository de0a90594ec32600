//! Shared payload definitions for the `xmtpbridge` bus channel.

pub mod request;
pub mod result;
pub mod status;
