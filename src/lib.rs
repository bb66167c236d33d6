//! # secretgate
//!
//! Secret-collection orchestration service for CI pipelines.
//!
//! A pipeline registers a session listing the secret values it needs. Humans
//! authorized through team membership submit those values over HTTP; each
//! value is encrypted and merged into the backing key-value store. When the
//! last pending key is supplied, a downstream automation job is dispatched
//! exactly once.
//!
//! ## Flow
//! 1. Pipeline registers a session (pending key names + run context)
//! 2. Authorized users fetch their pending-key view and submit values
//! 3. Each value is policy-processed, encrypted, and pushed to the store
//! 4. The submission that empties the pending set fires the downstream job
//!
//! ## Modules
//! - `engine`: session state machine and in-memory session store
//! - `access`: per-key team authorization against the membership oracle
//! - `crypto`: value encryption envelope and processing policy
//! - `store_client`: fetch/merge against the backing key-value store
//! - `dispatch`: one-shot downstream workflow trigger

pub mod access;
pub mod api;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod store_client;
pub mod util;

pub use config::Config;
pub use engine::SessionEngine;
pub use error::EngineError;
