//! Configuration file handling for parley.

mod schema;

pub use schema::{Config, DEFAULT_ENDPOINT, IdentityConfig, ServiceConfig};
