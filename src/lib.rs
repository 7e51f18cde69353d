//! Unsubscribe automation engine.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod store;
pub mod unsubscribe;
