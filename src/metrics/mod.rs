pub mod definitions;
pub mod exporter;
pub mod registry;
pub mod types;

pub use exporter::MetricsExporter;
pub use registry::GaugeRegistry;
