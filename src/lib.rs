//! `conductor`: a multi-agent AI development orchestrator core. Decomposes
//! a natural-language task into a dependency-ordered phase plan (per the
//! active `Mode`), executes it through a capped pool of agents, and
//! publishes every state transition to an in-process event bus and store.

pub mod agent;
pub mod config;
pub mod domain;
pub mod errors;
pub mod event_bus;
pub mod event_store;
pub mod mode;
pub mod orchestrator;
pub mod provider;
pub mod ui;

pub use errors::{ConfigError, OrchestratorError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, SubscriptionFilter};
