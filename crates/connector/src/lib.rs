//! Gateway adapter contract and registry.
//!
//! Every payment gateway integrates through the same four-method contract:
//! process a refund, poll its status, verify a webhook signature, and parse
//! webhook payloads into normalized events. Vendor errors are classified
//! into a fixed taxonomy whose retryability drives the worker pipeline.

pub mod adapters;
mod connector;
mod error;
mod registry;
mod result;
pub mod testing;
mod webhook;

pub use connector::{Connector, DynConnector};
pub use error::ConnectorError;
pub use registry::ConnectorRegistry;
pub use result::{NormalizedEvent, RefundResult, RefundResultStatus};
pub use webhook::{compute_hmac_sha256, verify_hmac_sha256};
