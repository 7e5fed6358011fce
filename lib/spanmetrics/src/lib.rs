//! Span metrics.
//!
//! This crate aggregates trace spans into request, error, and duration metrics. Spans are grouped per resource and
//! per series, where a series is identified by the span's service name, name, kind, and status code, along with any
//! configured dimensions. Aggregated state is flushed on a fixed interval into a [`MetricsSink`][sink::MetricsSink],
//! either as cumulative or as delta metrics.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod aggregation;
pub mod cache;
pub mod clock;
pub mod config;
pub mod data_model;
pub mod engine;
mod hash;
pub mod histogram;
pub mod key;
pub mod scheduler;
pub mod sink;
mod telemetry;
pub mod timestamps;
pub mod unit;

/// A generic error.
pub type GenericError = anyhow::Error;
