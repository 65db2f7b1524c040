//! HTTP API for the ensemble engine.
//!
//! ## Endpoints
//!
//! - `POST /api/chat` - run a thinking-mode pipeline, streaming the answer
//!   as newline-delimited frames (see [`crate::stream`])
//! - `GET /api/health` - health check

mod routes;
pub mod types;

pub use routes::{serve, AppState};
