//! Shared domain types for BrandPulse: the conversation model, tool-call
//! contracts, provider stream events, cancellation, configuration, and the
//! error type every other crate builds on.

pub mod cancel;
pub mod config;
pub mod error;
pub mod ids;
pub mod stream;
pub mod tool;
pub mod turn;
