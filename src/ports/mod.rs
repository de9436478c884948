pub mod config_provider;
pub mod proxy_engine;

pub use config_provider::ConfigProvider;
pub use proxy_engine::{EngineError, ProxyEngine, ProxyInstance};
