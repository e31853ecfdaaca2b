//! psychotropic — chat-bot lookup and image-rendering core.
//!
//! Pipeline, in dependency order:
//!   - [`router`] parses inbound chat events into typed commands;
//!   - [`lookup`] resolves a command's subject upstream, behind a TTL + LRU
//!     cache with per-key request coalescing;
//!   - [`render`] composes raster reply cards from resolved records;
//!   - [`dispatch`] delivers text and image replies with bounded retry.
//!
//! [`bot`] ties the stages into one event loop; [`runtime`] provides the
//! component scaffolding the loop and the transports run on.

pub mod bot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod lookup;
pub mod render;
pub mod router;
pub mod runtime;
pub mod transports;
