pub mod engine;
pub mod gauge;
pub mod metrics;
pub mod multiple;
pub mod tier;
