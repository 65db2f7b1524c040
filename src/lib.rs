//! # Ensemble
//!
//! A server-side LLM orchestration engine. One user turn is answered by a
//! selectable *thinking mode*: an ordered pipeline of steps (history
//! summarisation, planning, parallel inference, critique, integration) run
//! against a pool of backend models, with the synthesised answer streamed
//! back incrementally.
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/chat
//!        │
//!        ▼
//!  ┌──────────────┐   ┌─────────────┐   ┌──────────────────┐
//!  │ Orchestrator │──▶│  Summariser │──▶│  Mode pipeline   │
//!  └──────┬───────┘   └─────────────┘   │ (registry steps) │
//!         │                             └────────┬─────────┘
//!         │ frames                               │
//!         ▼                            ┌─────────┴─────────┐
//!   text/plain stream                  │ ParallelExecutor  │
//!   STATUS / DATA / …                  │ IntegrationExec.  │──▶ KeyPool
//!                                      └───────────────────┘
//! ```
//!
//! ## Request flow
//! 1. Parse the envelope, build the per-request key pool and context
//! 2. Summarise long histories (best-effort)
//! 3. Run the mode's steps, each mutating the shared context
//! 4. Emit the buffered answer if no step streamed, then the
//!    `MODEL_RESPONSES` frame, and close
//!
//! ## Modules
//! - `agents`: mode registry, step library, shared context
//! - `exec`: parallel fan-out and integration executors
//! - `keypool`: rotating credential pool with classified eviction
//! - `llm`: backend client, wire types, error classification
//! - `stream`: the five-tag line protocol

pub mod agents;
pub mod api;
pub mod config;
pub mod exec;
pub mod keypool;
pub mod llm;
pub mod orchestrator;
pub mod stream;

pub use config::Config;
