pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigError, load_config, parse_config};
pub use models::*;
pub use validation::{
    AddressError, ConfigValidator, ValidationError, ValidationErrors, ValidationResult,
    split_host_port,
};
