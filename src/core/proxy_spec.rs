//! Translation of a validated [`Config`] into engine-level listener specs.
//!
//! This layer does no I/O: each `listen` block becomes one [`ProxySpec`] whose
//! rules keep the order of the file, because the engine applies the first rule
//! that matches.
use serde::Serialize;

use crate::config::{Config, validation::is_set};

/// One routing rule attached to a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingRule {
    /// Forward every connection to `target`.
    Passthrough { target: String },
    /// Forward plaintext HTTP connections whose `Host` header equals `host`.
    HostMatch { host: String, target: String },
    /// Forward TLS connections whose ClientHello names `sni`.
    SniMatch { sni: String, target: String },
}

impl RoutingRule {
    pub fn target(&self) -> &str {
        match self {
            Self::Passthrough { target }
            | Self::HostMatch { target, .. }
            | Self::SniMatch { target, .. } => target,
        }
    }

    /// Whether evaluating this rule requires reading from the client first.
    pub fn needs_inspection(&self) -> bool {
        !matches!(self, Self::Passthrough { .. })
    }
}

/// A listener address and its ordered rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySpec {
    pub interface: String,
    pub rules: Vec<RoutingRule>,
}

/// Build listener specs for every listener in `config`.
///
/// `config` must already be validated; this function never fails.
pub fn build_proxy_specs(config: &Config) -> Vec<ProxySpec> {
    config
        .listeners
        .iter()
        .map(|listener| {
            let proxy_to = listener.proxy_to.as_ref().filter(|_| is_set(&listener.proxy_to));
            let rules = match proxy_to {
                Some(target) => vec![RoutingRule::Passthrough {
                    target: target.clone(),
                }],
                None => listener
                    .routes
                    .iter()
                    .flat_map(|route| {
                        let host = route
                            .host
                            .as_ref()
                            .filter(|_| is_set(&route.host))
                            .map(|host| RoutingRule::HostMatch {
                                host: host.clone(),
                                target: route.to.clone(),
                            });
                        let sni = route
                            .sni
                            .as_ref()
                            .filter(|_| is_set(&route.sni))
                            .map(|sni| RoutingRule::SniMatch {
                                sni: sni.clone(),
                                target: route.to.clone(),
                            });
                        host.into_iter().chain(sni)
                    })
                    .collect(),
            };

            ProxySpec {
                interface: listener.interface.clone(),
                rules,
            }
        })
        .collect()
}
