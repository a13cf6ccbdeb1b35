//! Metrics definitions for the queue gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const MESSAGES_SENT: MetricDef = MetricDef {
    name: "queue.messages.sent",
    metric_type: MetricType::Counter,
    description: "Number of messages enqueued, labeled by type",
};

pub const MESSAGES_RECEIVED: MetricDef = MetricDef {
    name: "queue.messages.received",
    metric_type: MetricType::Counter,
    description: "Number of messages fetched by the receiver",
};

pub const HANDLER_FAILURES: MetricDef = MetricDef {
    name: "queue.handler.failures",
    metric_type: MetricType::Counter,
    description: "Number of message handlers that returned an error",
};

pub const HANDLERS_IN_FLIGHT: MetricDef = MetricDef {
    name: "queue.handlers.in_flight",
    metric_type: MetricType::Gauge,
    description: "Number of message handlers currently running",
};

pub const RECEIVER_BUSY: MetricDef = MetricDef {
    name: "queue.receiver.busy",
    metric_type: MetricType::Counter,
    description: "Number of poll cycles skipped because every handler slot was taken",
};

pub const ALL_METRICS: &[MetricDef] = &[
    MESSAGES_SENT,
    MESSAGES_RECEIVED,
    HANDLER_FAILURES,
    HANDLERS_IN_FLIGHT,
    RECEIVER_BUSY,
];
