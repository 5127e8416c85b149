//! # Tollgate Shared
//!
//! Wire types returned to HTTP clients.

pub mod response;

pub use response::{ApiResponse, ErrorResponse, MessageResponse};
