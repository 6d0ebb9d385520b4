pub mod assistant;
pub mod config;
pub mod db;
pub mod market;
pub mod monitoring;
pub mod tracker;
pub mod valuation;
