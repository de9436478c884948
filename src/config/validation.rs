
use crate::config::models::{Config, Listener};

/// Structural problems with a `host:port` address.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {address}: missing port in address")]
    MissingPort { address: String },

    #[error("address {address}: too many colons in address")]
    TooManyColons { address: String },

    #[error("address {address}: missing ']' in address")]
    MissingBracket { address: String },

    #[error("address {address}: unexpected '[' or ']' in address")]
    UnexpectedBracket { address: String },

    #[error("address {address}: invalid port {port:?}")]
    InvalidPort { address: String, port: String },
}

/// Split an address into host and port.
///
/// Accepts `host:port`, `:port` and `[ipv6]:port`. The port must be a decimal
/// number in `0..=65535`; the host may be empty.
pub fn split_host_port(address: &str) -> Result<(&str, u16), AddressError> {
    let missing_port = || AddressError::MissingPort {
        address: address.to_string(),
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| AddressError::MissingBracket {
            address: address.to_string(),
        })?;
        let host = &rest[..end];
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(port) => port,
            None if rest[end + 1..].is_empty() => return Err(missing_port()),
            None => {
                return Err(AddressError::TooManyColons {
                    address: address.to_string(),
                });
            }
        };
        (host, port)
    } else {
        let idx = address.rfind(':').ok_or_else(missing_port)?;
        let host = &address[..idx];
        if host.contains(':') {
            return Err(AddressError::TooManyColons {
                address: address.to_string(),
            });
        }
        (host, &address[idx + 1..])
    };

    if host.contains('[') || host.contains(']') || port.contains('[') || port.contains(']') {
        return Err(AddressError::UnexpectedBracket {
            address: address.to_string(),
        });
    }

    if port.is_empty() {
        return Err(missing_port());
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidPort {
            address: address.to_string(),
            port: port.to_string(),
        })?;

    Ok((host, port))
}

/// A single configuration violation.
///
/// Listener and route indexes are 1-based, matching the order of blocks in the file.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one listen block must be provided")]
    NoListeners,

    #[error(
        "listener {listener} ({interface}): invalid listen address, expected host:port or :port. {source}"
    )]
    InvalidInterface {
        listener: usize,
        interface: String,
        source: AddressError,
    },

    #[error("listener {listener} ({interface}): either proxy_to or route can be set, not both")]
    ProxyToAndRoutes { listener: usize, interface: String },

    #[error("listener {listener} ({interface}): either proxy_to or route must be set")]
    MissingTarget { listener: usize, interface: String },

    #[error(
        "listener {listener} ({interface}): invalid proxy_to address {proxy_to:?}, expected host:port or :port. {source}"
    )]
    InvalidProxyTo {
        listener: usize,
        interface: String,
        proxy_to: String,
        source: AddressError,
    },

    #[error("listener {listener} ({interface}): route {route}: to attribute must be set")]
    MissingRouteDestination {
        listener: usize,
        interface: String,
        route: usize,
    },

    #[error(
        "listener {listener} ({interface}): route {route}: invalid destination address, expected host:port or :port. {source}"
    )]
    InvalidRouteDestination {
        listener: usize,
        interface: String,
        route: usize,
        source: AddressError,
    },

    #[error("listener {listener} ({interface}): route {route}: at least sni or host attribute must be set")]
    MissingRouteMatcher {
        listener: usize,
        interface: String,
        route: usize,
    },
}

/// Every violation found in one validation pass. Never empty.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("{}", render_errors(.0))]
pub struct ValidationErrors(Vec<ValidationError>);

fn render_errors(errors: &[ValidationError]) -> String {
    if let [single] = errors {
        return single.to_string();
    }

    let mut out = format!("Found {} validation errors:", errors.len());
    for (i, error) in errors.iter().enumerate() {
        out.push_str(&format!("\n  {}. {}", i + 1, error));
    }
    out
}

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }
}

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationErrors>;

/// Configuration validator.
///
/// Runs every check on every listener and route and reports all violations together.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult<()> {
        if config.listeners.is_empty() {
            return Err(ValidationErrors(vec![ValidationError::NoListeners]));
        }

        let mut errors = Vec::new();
        for (idx, listener) in config.listeners.iter().enumerate() {
            Self::validate_listener(idx + 1, listener, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    fn validate_listener(index: usize, listener: &Listener, errors: &mut Vec<ValidationError>) {
        let interface = &listener.interface;

        if let Err(source) = split_host_port(interface) {
            errors.push(ValidationError::InvalidInterface {
                listener: index,
                interface: interface.clone(),
                source,
            });
        }

        let proxy_to = listener.proxy_to.as_deref().filter(|_| is_set(&listener.proxy_to));
        let has_routes = !listener.routes.is_empty();
        match (proxy_to, has_routes) {
            (Some(_), true) => errors.push(ValidationError::ProxyToAndRoutes {
                listener: index,
                interface: interface.clone(),
            }),
            (None, false) => errors.push(ValidationError::MissingTarget {
                listener: index,
                interface: interface.clone(),
            }),
            _ => {}
        }

        if let Some(proxy_to) = proxy_to {
            if let Err(source) = split_host_port(proxy_to) {
                errors.push(ValidationError::InvalidProxyTo {
                    listener: index,
                    interface: interface.clone(),
                    proxy_to: proxy_to.to_string(),
                    source,
                });
            }
        }

        for (route_idx, route) in listener.routes.iter().enumerate() {
            let route_no = route_idx + 1;

            if route.to.is_empty() {
                errors.push(ValidationError::MissingRouteDestination {
                    listener: index,
                    interface: interface.clone(),
                    route: route_no,
                });
            } else if let Err(source) = split_host_port(&route.to) {
                errors.push(ValidationError::InvalidRouteDestination {
                    listener: index,
                    interface: interface.clone(),
                    route: route_no,
                    source,
                });
            }

            if !is_set(&route.host) && !is_set(&route.sni) {
                errors.push(ValidationError::MissingRouteMatcher {
                    listener: index,
                    interface: interface.clone(),
                    route: route_no,
                });
            }
        }
    }
}

/// Empty strings count as unset, the same as an absent attribute.
pub(crate) fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}
