pub mod backoff;
pub mod desired;
pub mod engine;
pub mod error;
pub mod executor;
#[cfg(test)]
mod memory;
pub mod planner;
pub mod purge;
pub mod remote;
pub mod resolver;
pub mod slug;
