//! Synthetic span generation.

use rand::{rngs::StdRng, Rng, SeedableRng as _};
use spanmetrics::{
    data_model::{
        trace::{
            InstrumentationScope, Resource, ResourceSpans, ScopeSpans, Span, SpanEvent, SpanId, SpanKind, StatusCode,
            TraceId,
        },
        Attributes,
    },
    key::SERVICE_NAME_KEY,
};

const OPERATIONS: &[(&str, SpanKind)] = &[
    ("GET /users", SpanKind::Server),
    ("POST /users", SpanKind::Server),
    ("GET /orders", SpanKind::Server),
    ("SELECT users", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
    ("render", SpanKind::Internal),
];

const ERROR_RATE: f64 = 0.05;
const BASE_DURATION_NS: u64 = 20_000_000;

/// Generates randomized spans for a fixed set of services.
pub struct SpanGenerator {
    rng: StdRng,
    services: Vec<String>,
}

impl SpanGenerator {
    /// Creates a new `SpanGenerator` spreading spans over `services` services.
    pub fn new(seed: u64, services: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            services: (0..services.max(1)).map(|i| format!("service-{}", i)).collect(),
        }
    }

    /// Generates `count` spans ending at `now`, grouped by service.
    pub fn generate(&mut self, now: u64, count: usize) -> Vec<ResourceSpans> {
        let mut per_service: Vec<Vec<Span>> = vec![Vec::new(); self.services.len()];
        for _ in 0..count {
            let service = self.rng.random_range(0..self.services.len());
            let span = self.generate_span(now);
            per_service[service].push(span);
        }

        self.services
            .iter()
            .zip(per_service)
            .filter(|(_, spans)| !spans.is_empty())
            .map(|(service, spans)| {
                ResourceSpans::new(
                    Resource::new(
                        Attributes::new()
                            .with(SERVICE_NAME_KEY, service.as_str())
                            .with("deployment.environment", "sandbox"),
                    ),
                    vec![ScopeSpans::new(InstrumentationScope::new("spanmetrics-sandbox", "0.1.0"), spans)],
                )
            })
            .collect()
    }

    fn generate_span(&mut self, now: u64) -> Span {
        let (name, kind) = OPERATIONS[self.rng.random_range(0..OPERATIONS.len())];
        let is_error = self.rng.random::<f64>() < ERROR_RATE;

        // Roughly exponential: most spans are fast, a few are much slower.
        let scale = 1u64 << self.rng.random_range(0..6);
        let duration = self.rng.random_range(BASE_DURATION_NS / 2..BASE_DURATION_NS * 3 / 2) * scale;
        let start = now.saturating_sub(duration);

        let mut attributes = Attributes::new().with("operation", name);
        if kind == SpanKind::Server {
            attributes.insert("http.method", name.split(' ').next().unwrap_or("GET"));
            attributes.insert("http.status_code", if is_error { 500i64 } else { 200i64 });
        }

        let mut span = Span::new(name)
            .with_ids(TraceId::from_bytes(self.rng.random()), SpanId::from_bytes(self.rng.random()))
            .with_kind(kind)
            .with_timestamps(start, now)
            .with_attributes(attributes);

        if is_error {
            span = span.with_status(StatusCode::Error).with_events(vec![SpanEvent::new("exception")
                .with_time_unix_nano(now)
                .with_attributes(Attributes::new().with("exception.type", "SimulatedError"))]);
        } else {
            span = span.with_status(StatusCode::Ok);
        }

        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_a_seed() {
        let a = SpanGenerator::new(7, 3).generate(1_000_000_000_000, 50);
        let b = SpanGenerator::new(7, 3).generate(1_000_000_000_000, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn spans_are_grouped_by_service() {
        let now = 1_000_000_000_000;
        let batch = SpanGenerator::new(1, 2).generate(now, 100);

        assert!(!batch.is_empty() && batch.len() <= 2);
        let total: usize = batch
            .iter()
            .flat_map(|rs| rs.scope_spans())
            .map(|ss| ss.spans().len())
            .sum();
        assert_eq!(total, 100);

        for rs in &batch {
            assert!(rs.resource().attributes().get(SERVICE_NAME_KEY).is_some());
            for span in rs.scope_spans().iter().flat_map(|ss| ss.spans()) {
                assert_eq!(span.end_time_unix_nano(), now);
                assert!(span.duration_nanos() > 0);
            }
        }
    }
}
