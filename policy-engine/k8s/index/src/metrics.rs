use crate::Reader;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(Reader);

/// Reports the size of the active snapshot.
pub fn register(reg: &mut Registry, reader: Reader) {
    reg.register_collector(Box::new(Instrumented(reader)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let snapshot = self.0.snapshot();

        let generation_encoder = encoder.encode_descriptor(
            "snapshot_generation",
            "The generation of the active configuration snapshot",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(snapshot.generation() as i64).encode(generation_encoder)?;

        let mut size_encoder = encoder.encode_descriptor(
            "snapshot_resources",
            "The number of resources in the active configuration snapshot",
            None,
            MetricType::Gauge,
        )?;
        for (kind, count) in snapshot.counts().by_kind() {
            let labels = vec![("kind", kind)];
            let gauge_encoder = size_encoder.encode_family(&labels)?;
            ConstGauge::new(count as i64).encode(gauge_encoder)?;
        }

        Ok(())
    }
}
