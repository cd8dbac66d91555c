// Input streams and the counting worker pool
pub mod engine;
pub mod generator;
pub mod streams;

pub use engine::{CountMetrics, MerCounter};
pub use generator::{GeneratorManager, GeneratorStream};
pub use streams::{InputSource, StreamManager};
