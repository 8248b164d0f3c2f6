pub mod config;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod run;
pub mod table;

pub use config::ModelConfig;
