//! Helpdesk ticket lifecycle and attachment integrity subsystem.
//!
//! The crate owns the rules with real invariants: when a closed ticket
//! may be reopened and how the successor is linked, how tickets move
//! between agents under a capacity constraint with a permanent audit
//! trail, and how the attachment store is reconciled against the
//! filesystem. Routing, authentication and notification delivery live
//! with the embedding application; this crate consumes their results
//! (user ids, capability booleans) and emits post-commit events.

pub mod attachments;
pub mod config;
pub mod directory;
pub mod events;
pub mod maintenance;
pub mod reopening;
pub mod shared;
pub mod tickets;
pub mod transfers;

pub use config::DeskConfig;
pub use shared::error::{DeskError, DeskResult};
pub use shared::utils::{create_pool, create_pool_from_env, run_migrations, DbPool};
