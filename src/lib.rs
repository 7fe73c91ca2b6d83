// src/lib.rs
//! Refresh-and-serve cache for forum deal topics.
//!
//! A background [`refresh::Refresher`] pulls the full topic list from a
//! [`provider::TopicProvider`] and swaps it into the [`store::TopicStore`];
//! HTTP handlers read through [`query::QueryService`] without ever waiting on
//! a fetch.

pub mod api;
pub mod config;
pub mod context;
pub mod metrics;
pub mod provider;
pub mod query;
pub mod refresh;
pub mod store;
pub mod topic;

pub use crate::api::router;
pub use crate::context::AppContext;
