//! Metrics definitions for the edge controllers.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RECONCILES: MetricDef = MetricDef {
    name: "agent.reconciles",
    metric_type: MetricType::Counter,
    description: "Reconcile invocations, labeled by controller",
};

pub const RECONCILE_ERRORS: MetricDef = MetricDef {
    name: "agent.reconcile.errors",
    metric_type: MetricType::Counter,
    description: "Failed reconciles, labeled by controller",
};

pub const RECONCILE_DURATION: MetricDef = MetricDef {
    name: "agent.reconcile.duration",
    metric_type: MetricType::Histogram,
    description: "Reconcile duration in seconds, labeled by controller",
};

pub const EVENTS_EMITTED: MetricDef = MetricDef {
    name: "agent.events.emitted",
    metric_type: MetricType::Counter,
    description: "Events sent to the queue, labeled by type",
};

pub const EVENTS_FILTERED: MetricDef = MetricDef {
    name: "agent.events.filtered",
    metric_type: MetricType::Counter,
    description: "Watch events dropped before reconcile, labeled by controller",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RECONCILES,
    RECONCILE_ERRORS,
    RECONCILE_DURATION,
    EVENTS_EMITTED,
    EVENTS_FILTERED,
];
