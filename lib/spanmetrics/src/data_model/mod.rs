//! Data model.
//!
//! Spans flow in as [`trace::ResourceSpans`], and aggregated metrics flow out as a [`metric::MetricsBatch`].

mod attributes;
pub use self::attributes::{AttributeValue, Attributes};

pub mod metric;
pub mod trace;
