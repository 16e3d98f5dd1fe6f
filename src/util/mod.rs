pub mod clock;
pub mod ids;
pub mod interval;
pub mod telemetry;

pub use clock::*;
pub use ids::*;
pub use interval::*;
pub use telemetry::*;
