pub mod schema;

pub use schema::{Config, MasterConfig, ReturnerConfig};
