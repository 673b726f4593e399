//! Metrics definitions for fetching and syncing.
//!
//! Every metric emitted by the workspace is declared here so the full set can
//! be listed from one place.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($label:tt)+) => {
        metrics::counter!($def.name, $($label)+)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
    ($def:expr, $($label:tt)+) => {
        metrics::histogram!($def.name, $($label)+)
    };
}

pub const CAMPAIGN_CACHE_HIT: MetricDef = MetricDef {
    name: "campaign_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of campaign lookups served from the cache",
};

pub const CAMPAIGN_CACHE_MISS: MetricDef = MetricDef {
    name: "campaign_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of campaign lookups that required an upstream fetch",
};

pub const CAMPAIGN_CACHE_STALE: MetricDef = MetricDef {
    name: "campaign_cache.stale_fallback",
    metric_type: MetricType::Counter,
    description: "Number of failed campaign refreshes answered with a stale cached value",
};

pub const UPSTREAM_REQUEST_FAILED: MetricDef = MetricDef {
    name: "upstream.request.failed",
    metric_type: MetricType::Counter,
    description: "Number of failed upstream requests, tagged by request kind",
};

pub const FANOUT_DURATION: MetricDef = MetricDef {
    name: "fanout.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one fan-out fetch in seconds, tagged by operation",
};

pub const STREAK_THRESHOLDS_AWARDED: MetricDef = MetricDef {
    name: "extensions.streak.awarded",
    metric_type: MetricType::Counter,
    description: "Number of streak thresholds newly awarded, tagged by streak kind",
};

pub const TRANSFORM_FIELD_DELETED: MetricDef = MetricDef {
    name: "transforms.field.deleted",
    metric_type: MetricType::Counter,
    description: "Number of fields removed by a conditional transform, tagged by function",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CAMPAIGN_CACHE_HIT,
    CAMPAIGN_CACHE_MISS,
    CAMPAIGN_CACHE_STALE,
    UPSTREAM_REQUEST_FAILED,
    FANOUT_DURATION,
    STREAK_THRESHOLDS_AWARDED,
    TRANSFORM_FIELD_DELETED,
];
