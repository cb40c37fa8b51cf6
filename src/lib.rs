//! Watchpost: monitors, triggers and silences for metric-driven alerting.
//!
//! The core model (probes, targets, datasources, triggers, silences) is
//! storage-agnostic; `db`, `scheduler` and `web` wrap it in a SQLite store,
//! an alert daemon and a JSON API.

pub mod config;
pub mod datasource;
pub mod db;
pub mod error;
pub mod model;
pub mod pattern;
pub mod period;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod silence;
pub mod target;
pub mod trigger;
pub mod web;
