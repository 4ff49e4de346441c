//! Terminal rendering for the live event stream `task watch`/`task create`
//! subscribe to. Kept separate from the CLI's command dispatch so the
//! renderer can be unit-tested without a terminal attached.

pub mod progress;

pub use progress::EventRenderer;
