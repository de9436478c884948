pub mod config_providers;
pub mod tcp_engine;

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use tcp_engine::{EngineOptions, TcpProxyEngine, TcpProxyInstance};
