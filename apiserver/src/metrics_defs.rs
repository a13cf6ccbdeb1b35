//! Metrics definitions for the apiserver.

use shared::metrics_defs::{MetricDef, MetricType};

pub const INGEST_HANDLED: MetricDef = MetricDef {
    name: "ingest.messages.handled",
    metric_type: MetricType::Counter,
    description: "Messages applied to the store, labeled by type",
};

pub const INGEST_SKIPPED: MetricDef = MetricDef {
    name: "ingest.messages.skipped",
    metric_type: MetricType::Counter,
    description: "Messages dropped because a newer update was already stored",
};

pub const INGEST_UNHANDLED: MetricDef = MetricDef {
    name: "ingest.messages.unhandled",
    metric_type: MetricType::Counter,
    description: "Messages with an event type no handler is registered for",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Responses served from the response cache",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Cacheable requests that missed the response cache",
};

pub const CACHE_INVALIDATE: MetricDef = MetricDef {
    name: "cache.invalidate",
    metric_type: MetricType::Counter,
    description: "Tag invalidations of the response cache",
};

pub const CACHE_ERRORS: MetricDef = MetricDef {
    name: "cache.errors",
    metric_type: MetricType::Counter,
    description: "Cache backend failures; the request falls through to the handler",
};

pub const HTTP_REQUEST_DURATION: MetricDef = MetricDef {
    name: "http.request.duration",
    metric_type: MetricType::Histogram,
    description: "HTTP request duration in seconds, labeled by method, route and status",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "http.rate_limited",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the rate limiter",
};

pub const PATCH_FORWARDED: MetricDef = MetricDef {
    name: "patch.forwarded",
    metric_type: MetricType::Counter,
    description: "Merge patches sent to edge clusters, labeled by outcome",
};

pub const ALL_METRICS: &[MetricDef] = &[
    INGEST_HANDLED,
    INGEST_SKIPPED,
    INGEST_UNHANDLED,
    CACHE_HIT,
    CACHE_MISS,
    CACHE_INVALIDATE,
    CACHE_ERRORS,
    HTTP_REQUEST_DURATION,
    RATE_LIMITED,
    PATCH_FORWARDED,
];
