use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_RECEIVED: MetricDef = MetricDef {
    name: "events.received",
    metric_type: MetricType::Counter,
    description: "CloudEvents accepted by the ingest listener",
};

pub const EVENTS_FINISHED: MetricDef = MetricDef {
    name: "events.finished",
    metric_type: MetricType::Counter,
    description: "Monaco tasks that sent a finished event. Tagged with result.",
};

pub const MONACO_DURATION: MetricDef = MetricDef {
    name: "monaco.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent running monaco in seconds. Tagged with result.",
};

pub const FILES_MATERIALIZED: MetricDef = MetricDef {
    name: "files.materialized",
    metric_type: MetricType::Histogram,
    description: "Files written to the workspace per event. Tagged with source.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_RECEIVED,
    EVENTS_FINISHED,
    MONACO_DURATION,
    FILES_MATERIALIZED,
];
