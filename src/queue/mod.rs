pub mod memory;
pub mod queue;
pub mod redis;
pub mod store;
