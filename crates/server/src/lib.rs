//! The Refundry HTTP server.
//!
//! Serves the refund, bank account, parameter, approval, and webhook
//! surfaces over axum, and hosts the worker pool in the same process.
//! Correlation ids arrive via `X-Correlation-ID` (generated when absent)
//! and travel through every downstream call and queue message.

pub mod api;
pub mod config;
mod error;
pub mod telemetry;

pub use error::ServerError;
