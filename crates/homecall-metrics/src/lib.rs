pub mod collector;
pub mod exposition;
pub mod process;
pub mod state;

pub use collector::Collector;
pub use exposition::render_prometheus;
pub use process::ProcessStats;
pub use state::{MetricSnapshot, MetricState};
