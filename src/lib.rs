//! Interactive streaming chat agent.
//!
//! Invariant: single event gate — only the per-stream flush thread in
//! [`ui_bridge`] emits onto the UI channel for a live stream, so token
//! deltas, the terminal event, and status updates arrive in order.
//!
//! # Public API Overview
//! - Register providers in a [`registry::ModelRegistry`] and stream
//!   with fallback across a model chain.
//! - Drive full prompt cycles (stream, then tools) with
//!   [`session::SessionLoop`].
//! - Consume UI updates from the [`events`] channel; [`render`] has a
//!   plain-text drain for terminals.
//! - Register tools on a [`tools::ToolDispatcher`].

pub mod config;
pub mod events;
pub mod logging;
pub mod registry;
pub mod render;
pub mod session;
pub mod stream;
pub mod tools;
pub mod ui_bridge;
