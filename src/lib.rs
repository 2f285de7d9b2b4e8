pub mod config;
pub mod error;
pub mod influx;
pub mod probe;
pub mod report;
pub mod runner;
