//! Support Triage: inbound support email classification and stateful
//! refund conversation resolution.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
