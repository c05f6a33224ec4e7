use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct HttpMetrics {
    requests: Family<Labels, Counter>,
    durations: Family<RouteLabels, Histogram>,
}

/// Records the outcome of a single request.
#[derive(Debug)]
pub(crate) struct RequestObserver {
    start: time::Instant,
    route: &'static str,
    metrics: HttpMetrics,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    route: &'static str,
    status: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RouteLabels {
    route: &'static str,
}

// === HttpMetrics ===

impl HttpMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<Labels, Counter>::default();
        reg.register(
            "requests",
            "Total number of requests handled by the aggregated API",
            requests.clone(),
        );

        let durations = Family::<RouteLabels, Histogram>::new_with_constructor(|| {
            // Fan-out lists are bounded by the API server's request timeout.
            Histogram::new([0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0])
        });
        reg.register_with_unit(
            "request_duration",
            "Histogram of response latency (seconds) of the aggregated API",
            Unit::Seconds,
            durations.clone(),
        );

        Self {
            requests,
            durations,
        }
    }

    pub(crate) fn start(&self, route: &'static str) -> RequestObserver {
        RequestObserver {
            start: time::Instant::now(),
            route,
            metrics: self.clone(),
        }
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === RequestObserver ===

impl RequestObserver {
    pub(crate) fn end(self, status: http::StatusCode) {
        let Self {
            start,
            route,
            metrics,
        } = self;
        metrics
            .durations
            .get_or_create(&RouteLabels { route })
            .observe(start.elapsed().as_secs_f64());
        metrics
            .requests
            .get_or_create(&Labels {
                route,
                status: status.as_str().to_string(),
            })
            .inc();
    }
}
