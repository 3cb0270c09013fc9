//! Deployable server for the docsync engine.
//!
//! Wires [`docsync`] to SQLite (sessions, membership, document state) and
//! exposes it over axum: `GET /collab/{document_id}` for WebSocket editing
//! sessions and `GET /api/documents/{document_id}` for hot-state reads.

pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod persistence;
pub mod projection;
pub mod state;

pub use state::AppState;
