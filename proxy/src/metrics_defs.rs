use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Cache lookups served from the store. Tagged with layer, source_kind.",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Cache lookups that required an upstream fetch. Tagged with layer, source_kind.",
};

pub const CACHE_STORE_ERROR: MetricDef = MetricDef {
    name: "cache.store_error",
    metric_type: MetricType::Counter,
    description: "Failed cache store operations. Tagged with operation (get, put, link).",
};

pub const CACHE_SINGLE_COLOR_LINKED: MetricDef = MetricDef {
    name: "cache.single_color_linked",
    metric_type: MetricType::Counter,
    description: "Uniformly colored images stored as a link to a shared entry",
};

pub const FETCH_COALESCED: MetricDef = MetricDef {
    name: "fetch.coalesced",
    metric_type: MetricType::Counter,
    description: "Cache misses that waited for a fetch already in flight for the same key",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "upstream.request.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream request duration in seconds. Tagged with status.",
};

pub const DISPATCH_ERRORS: MetricDef = MetricDef {
    name: "dispatch.errors",
    metric_type: MetricType::Counter,
    description: "Failed requests. Tagged with layer, kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_STORE_ERROR,
    CACHE_SINGLE_COLOR_LINKED,
    FETCH_COALESCED,
    UPSTREAM_REQUEST_DURATION,
    DISPATCH_ERRORS,
];
