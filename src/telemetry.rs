use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    detection_duration: Histogram<u64>,
    generation_duration: Histogram<u64>,
    detections_counter: Counter<u64>,
    pub registry: Registry,
    // keeps the pipeline alive if the global provider gets replaced
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {:?}", e))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("space_gem");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let detection_duration = meter
            .u64_histogram("detection_duration_ms")
            .with_boundaries(generate_boundaries((50, 250, 1000, 5000, 30000)))
            .with_description("Duration of detection service calls in milliseconds")
            .build();

        let generation_duration = meter
            .u64_histogram("generation_duration_ms")
            .with_boundaries(generate_boundaries((250, 1000, 5000, 20000, 60000)))
            .with_description("Duration of text generation calls in milliseconds")
            .build();

        let detections_counter = meter
            .u64_counter("detections_total")
            .with_description("Detection outcomes by response shape")
            .build();

        Ok(Metrics {
            request_counter,
            detection_duration,
            generation_duration,
            detections_counter,
            registry,
            _provider: provider,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_detection_duration(&self, duration_ms: u64, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.detection_duration.record(duration_ms, &attributes);
    }

    pub fn record_generation_duration(&self, duration_ms: u64) {
        self.generation_duration.record(duration_ms, &[]);
    }

    pub fn record_outcome(&self, outcome: &'static str) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.detections_counter.add(1, &attributes);
    }
}

/// Histogram buckets: four linear segments between the five given edges,
/// each segment a tenth of its span.
fn generate_boundaries(parts: (u64, u64, u64, u64, u64)) -> Vec<f64> {
    let edges = [parts.0, parts.1, parts.2, parts.3, parts.4];

    let mut seen = HashSet::new();
    edges
        .windows(2)
        .flat_map(|pair| {
            let step = ((pair[1] - pair[0]) / 10).max(1) as usize;
            (pair[0]..=pair[1]).step_by(step)
        })
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries((0, 10, 30, 50, 150));
        let expected = vec![
            0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 12.0, 14.0, 16.0, 18.0, 20.0,
            22.0, 24.0, 26.0, 28.0, 30.0, 32.0, 34.0, 36.0, 38.0, 40.0, 42.0, 44.0, 46.0, 48.0,
            50.0, 60.0, 70.0, 80.0, 90.0, 100.0, 110.0, 120.0, 130.0, 140.0, 150.0,
        ];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_boundaries_are_strictly_increasing() {
        let get = generate_boundaries((50, 250, 1000, 5000, 30000));
        assert!(get.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(get.first(), Some(&50.0));
        assert_eq!(get.last(), Some(&30000.0));
    }
}
