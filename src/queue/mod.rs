//! Consumers, producers, and the registry that owns them

pub mod consumer;
pub mod producer;
pub mod registry;

pub use consumer::Consumer;
pub use producer::Producer;
pub use registry::QueueRegistry;
