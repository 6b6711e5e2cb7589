//! HTTP message-router surface.
//!
//! - [`api`]: request/response types and route handlers

pub mod api;
