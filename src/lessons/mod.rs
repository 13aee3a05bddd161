//! Lesson records and the HTTP surface around them.
//!
//! ```text
//! ┌──────────┐   HTTP   ┌───────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)       │
//! │          │ <─────── │    └─ api.rs  (handlers, AppState)            │
//! └──────────┘ WebSocket│         │                                     │
//!                       │         │ Orchestrator::run()  (generation)   │
//!                       │         │ render_module()      (display)      │
//!                       │         v                                     │
//!                       │  db.rs  (LessonDb, DbHandle: ModuleStore)     │
//!                       │  ws.rs  (WsMessage, broadcast_message)        │
//!                       └───────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod db;
pub mod models;
pub mod server;
pub mod ws;

pub use db::{DbHandle, LessonDb};
pub use models::{LessonQuery, LessonRecord, LessonSort, LessonSummary, NewLesson};
pub use server::{ServerConfig, start_server};
