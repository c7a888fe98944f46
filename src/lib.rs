pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod job_queue;
pub mod models;
pub mod openapi;
pub mod orchestrator;
pub mod routes;
pub mod store;
pub mod telemetry;
pub mod validation;
pub mod worker;
