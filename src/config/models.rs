//! Configuration data structures for the proxy.
//!
//! These types mirror the block/attribute file format one to one:
//!
//! ```text
//! listen ":443" {
//!     route {
//!         sni = "example.com"
//!         to  = "10.0.0.2:443"
//!     }
//! }
//! ```
//!
//! A [`Config`] is only handed out by the loader after validation succeeded and is never
//! patched afterwards; a reload always produces a fresh value.
use serde::{Deserialize, Serialize};

/// Root configuration: the ordered list of `listen` blocks.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub listeners: Vec<Listener>,
}

/// A single `listen "<interface>" { ... }` block.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Listener {
    /// Bind address in `host:port` or `:port` form.
    pub interface: String,
    /// Forward every connection to this backend. Mutually exclusive with `routes`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_to: Option<String>,
    /// Matched routes, evaluated in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

/// A `route { ... }` block inside a listener.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Route {
    /// HTTP `Host` header to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// TLS server name to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    /// Backend address.
    #[serde(default)]
    pub to: String,
}

impl Config {
    pub fn new(listeners: Vec<Listener>) -> Self {
        Self { listeners }
    }
}

impl Listener {
    /// Listener that forwards everything to a single backend.
    pub fn passthrough(interface: impl Into<String>, proxy_to: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            proxy_to: Some(proxy_to.into()),
            routes: Vec::new(),
        }
    }

    /// Listener that dispatches on the given routes.
    pub fn routed(interface: impl Into<String>, routes: Vec<Route>) -> Self {
        Self {
            interface: interface.into(),
            proxy_to: None,
            routes,
        }
    }
}

impl Route {
    pub fn host(host: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            sni: None,
            to: to.into(),
        }
    }

    pub fn sni(sni: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            host: None,
            sni: Some(sni.into()),
            to: to.into(),
        }
    }

    /// Add an SNI matcher next to an existing host matcher.
    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.sni = Some(sni.into());
        self
    }
}
