//! Metrics definitions for the store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const STORE_OPERATION_DURATION: MetricDef = MetricDef {
    name: "store.operation.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a store operation in seconds, labeled by operation",
};

pub const STORE_OPERATION_ERRORS: MetricDef = MetricDef {
    name: "store.operation.errors",
    metric_type: MetricType::Counter,
    description: "Number of failed store operations, labeled by operation",
};

pub const STORE_ROWS_SCANNED: MetricDef = MetricDef {
    name: "store.rows.scanned",
    metric_type: MetricType::Histogram,
    description: "Number of rows enumerated by a listing before pagination",
};

pub const ALL_METRICS: &[MetricDef] = &[
    STORE_OPERATION_DURATION,
    STORE_OPERATION_ERRORS,
    STORE_ROWS_SCANNED,
];
