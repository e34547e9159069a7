//! iqdb: HTTP front door for the image retrieval core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │      POST/GET/DELETE /images/:id, POST /query, /status      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               RwLock<ImageDb> (iqdb-core)                   │
//! │    Haar signatures, inverted bucket index, SQLite store     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod server;

pub use server::{create_router, serve, AppState};
