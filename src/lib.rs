//! Daily acquisition of chemical-transport-model forecasts.
//!
//! A datasource pairs a model from [`models`] with a transfer [`drivers::Driver`];
//! [`orchestrator::Orchestrator`] runs it once per forecast day.

pub mod config;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod external;
pub mod inspect;
pub mod listing;
pub mod markers;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod output;
pub mod retry;
pub mod store;
pub mod template;
pub mod timegrid;
