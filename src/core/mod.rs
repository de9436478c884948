pub mod messages;
pub mod orchestrator;
pub mod proxy_set;
pub mod proxy_spec;
pub mod watcher;

pub use messages::{ProxySetInbox, ProxySetSender, ProxySetUpdate, proxy_set_channel};
pub use orchestrator::{LifecycleState, Orchestrator, OrchestratorError};
pub use proxy_set::{ListenerStartError, ProxySet};
pub use proxy_spec::{ProxySpec, RoutingRule, build_proxy_specs};
pub use watcher::ConfigWatcher;
