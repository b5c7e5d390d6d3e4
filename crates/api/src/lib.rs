//! Status and ingestion HTTP surface for the Herald delivery pipeline.

pub mod bootstrap;
pub mod routes;
pub mod state;
