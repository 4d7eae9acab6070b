pub mod bridge;
pub mod config;
pub mod data_models;
pub mod enrich;
pub mod errors;
pub mod file_processor;
pub mod geometry;
pub mod integration;
pub mod metrics;
pub mod parallel;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod rollup;
pub mod timestamps;
pub mod utils;
pub mod validation;

#[cfg(test)]
mod tests;
