//! Gateway: the HTTP surface Slack delivers events to.
//!
//! One port serves the Events API webhook (`POST /interactivity`, alias
//! `POST /slack/events`) and a health probe (`GET /`).

mod server;
pub mod signature;

pub use server::{responder_from_config, router, run_gateway, GatewayState};
