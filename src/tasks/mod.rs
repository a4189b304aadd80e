//! Background Tasks Module
//!
//! # Tasks
//! - Expiry sweep: drops expired entries from the in-memory store so
//!   untouched keys do not accumulate between reads

mod cleanup;

pub use cleanup::spawn_cleanup_task;
