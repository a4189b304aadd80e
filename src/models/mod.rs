//! Response models for the monitoring API
//!
//! DTOs serialised as the JSON bodies of the health, stats and admin
//! endpoints.

pub mod responses;

// Re-export commonly used types
pub use responses::{
    ErrorResponse, FlushResponse, HealthResponse, InvalidateResponse, StatsResponse,
};
