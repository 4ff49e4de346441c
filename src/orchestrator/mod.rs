//! Task orchestration: decomposition, dependency-ordered phase/subtask
//! scheduling, and the worker pool agents execute on.
//!
//! | Module              | Responsibility                                          |
//! |----------------------|---------------------------------------------------------|
//! | `engine`             | `Orchestrator`: task lifecycle, phase/subtask pipeline   |
//! | `queue`               | Generic dependency-ordered `TaskQueue<T>`                |
//! | `worker_pool`         | Concurrency-capped agent dispatch with timeouts          |
//! | `project_registry`    | In-memory project records a task can be scoped to        |
//! | `backoff`             | Exponential backoff with jitter for the retry loop       |
//! | `cost`                | Cost-cap enforcement helpers                             |

pub mod backoff;
pub mod cost;
pub mod engine;
pub mod project_registry;
pub mod queue;
pub mod worker_pool;

pub use engine::{Orchestrator, OrchestratorConfig, SubscriptionFilter};
pub use project_registry::ProjectRegistry;
pub use queue::TaskQueue;
pub use worker_pool::WorkerPool;
