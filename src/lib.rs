pub mod cli;
pub mod context;
pub mod db;
pub mod error;
pub mod execution;
pub mod graph;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod normalize;
pub mod progress;
pub mod project;
pub mod relationships;
pub mod server;
pub mod sql_constants;
pub mod tasks;
pub mod templates;
pub mod tools;

#[cfg(test)]
pub mod test_utils;
