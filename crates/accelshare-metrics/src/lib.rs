//! Accelshare metrics sink: counter/gauge/histogram handles behind a small
//! trait so no component talks to a concrete monitoring system directly.

pub mod sink;

pub use sink::{Counter, Gauge, Histogram, InMemorySink, LabelSet, MetricsSink, NullSink};
