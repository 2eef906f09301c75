pub mod exporter;
pub mod handlers;
pub mod router;

pub use exporter::PullExporter;
pub use router::{ApiState, metrics_router};
