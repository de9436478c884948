use std::path::{Path, PathBuf};

use hcl::{Block, Body, Expression};

use crate::config::{
    models::{Config, Listener, Route},
    validation::{ConfigValidator, ValidationErrors},
};

/// Why a configuration could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Access {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not a well-formed listen/route document.
    #[error("failed to parse configuration {file}: {message}")]
    Parse { file: String, message: String },

    /// The file parsed but describes an inconsistent setup.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

impl ConfigError {
    fn parse(file: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.to_string(),
            message: message.into(),
        }
    }
}

/// Read, parse and validate the configuration file at `path`.
pub async fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Access {
            path: path.to_path_buf(),
            source,
        })?;

    parse_config(&path.display().to_string(), &content)
}

/// Read, parse and validate synchronously (used by the `--check` mode)
pub fn load_config_sync(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Access {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&path.display().to_string(), &content)
}

/// Parse and validate configuration text. `file` is only used in error messages.
pub fn parse_config(file: &str, content: &str) -> Result<Config, ConfigError> {
    let config = parse_config_unchecked(file, content)?;
    ConfigValidator::validate(&config)?;
    Ok(config)
}

/// Parse configuration text without running semantic validation.
pub fn parse_config_unchecked(file: &str, content: &str) -> Result<Config, ConfigError> {
    let body = hcl::parse(content).map_err(|e| ConfigError::parse(file, e.to_string()))?;

    if let Some(attr) = body.attributes().next() {
        return Err(ConfigError::parse(
            file,
            format!("unexpected top-level attribute {:?}", attr.key.as_str()),
        ));
    }

    let mut listeners = Vec::new();
    for block in body.blocks() {
        match block.identifier.as_str() {
            "listen" => listeners.push(parse_listener(file, block)?),
            other => {
                return Err(ConfigError::parse(
                    file,
                    format!("unexpected block type {other:?}, expected \"listen\""),
                ));
            }
        }
    }

    Ok(Config::new(listeners))
}

fn parse_listener(file: &str, block: &Block) -> Result<Listener, ConfigError> {
    let interface = match block.labels.as_slice() {
        [label] => label.as_str().to_string(),
        labels => {
            return Err(ConfigError::parse(
                file,
                format!(
                    "listen block requires exactly one label (the interface), found {}",
                    labels.len()
                ),
            ));
        }
    };

    let context = format!("listen {interface:?}");
    let mut proxy_to = None;
    for (key, value) in string_attributes(file, &context, &block.body)? {
        match key {
            "proxy_to" => set_once(file, &context, key, &mut proxy_to, value)?,
            other => {
                return Err(ConfigError::parse(
                    file,
                    format!("{context}: unsupported attribute {other:?}"),
                ));
            }
        }
    }

    let mut routes = Vec::new();
    for inner in block.body.blocks() {
        match inner.identifier.as_str() {
            "route" => routes.push(parse_route(file, &context, routes.len() + 1, inner)?),
            other => {
                return Err(ConfigError::parse(
                    file,
                    format!("{context}: unexpected block type {other:?}, expected \"route\""),
                ));
            }
        }
    }

    Ok(Listener {
        interface,
        proxy_to: proxy_to.filter(|v: &String| !v.is_empty()),
        routes,
    })
}

fn parse_route(
    file: &str,
    listener_context: &str,
    index: usize,
    block: &Block,
) -> Result<Route, ConfigError> {
    let context = format!("{listener_context} route {index}");
    if !block.labels.is_empty() {
        return Err(ConfigError::parse(
            file,
            format!("{context}: route blocks take no labels"),
        ));
    }
    if let Some(inner) = block.body.blocks().next() {
        return Err(ConfigError::parse(
            file,
            format!(
                "{context}: unexpected nested block {:?}",
                inner.identifier.as_str()
            ),
        ));
    }

    let (mut host, mut sni, mut to) = (None, None, None);
    for (key, value) in string_attributes(file, &context, &block.body)? {
        let slot = match key {
            "host" => &mut host,
            "sni" => &mut sni,
            "to" => &mut to,
            other => {
                return Err(ConfigError::parse(
                    file,
                    format!("{context}: unsupported attribute {other:?}"),
                ));
            }
        };
        set_once(file, &context, key, slot, value)?;
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    Ok(Route {
        host: non_empty(host),
        sni: non_empty(sni),
        to: to.unwrap_or_default(),
    })
}

/// All attributes of `body`, requiring each to be a plain string literal.
fn string_attributes<'a>(
    file: &str,
    context: &str,
    body: &'a Body,
) -> Result<Vec<(&'a str, String)>, ConfigError> {
    body.attributes()
        .map(|attr| match &attr.expr {
            Expression::String(value) => Ok((attr.key.as_str(), value.clone())),
            _ => Err(ConfigError::parse(
                file,
                format!(
                    "{context}: attribute {:?} must be a string",
                    attr.key.as_str()
                ),
            )),
        })
        .collect()
}

fn set_once(
    file: &str,
    context: &str,
    key: &str,
    slot: &mut Option<String>,
    value: String,
) -> Result<(), ConfigError> {
    if slot.is_some() {
        return Err(ConfigError::parse(
            file,
            format!("{context}: attribute {key:?} is set more than once"),
        ));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::validation::ValidationError;

    fn validation_report(content: &str) -> String {
        match parse_config("test.hcl", content) {
            Err(ConfigError::Validation(errors)) => errors.to_string(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn parses_direct_proxy() {
        let config = parse_config(
            "direct.hcl",
            r#"
listen ":8899" {
    proxy_to = "somedomain.com:80"
}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            Config::new(vec![Listener::passthrough(":8899", "somedomain.com:80")])
        );
    }

    #[test]
    fn parses_multiple_listeners_in_order() {
        let config = parse_config(
            "multi.hcl",
            r#"
listen ":1234" {
	proxy_to = "domain-one.com:8877"
}

listen ":2345" {
	proxy_to = "domain-two:7657"
}
"#,
        )
        .unwrap();

        let interfaces: Vec<_> = config
            .listeners
            .iter()
            .map(|l| l.interface.as_str())
            .collect();
        assert_eq!(interfaces, [":1234", ":2345"]);
    }

    #[test]
    fn parses_routed_proxy() {
        let config = parse_config(
            "routed.hcl",
            r#"
listen ":1234" {
	route {
		host = "domain.com"
		to = "otherdomain.com:6543"
	}

	route {
		sni = "mydomain.com"
		to = "newdomain.com:7890"
	}
}

listen ":2345" {
	proxy_to = "domain-two:7657"
}
"#,
        )
        .unwrap();

        assert_eq!(
            config,
            Config::new(vec![
                Listener::routed(
                    ":1234",
                    vec![
                        Route::host("domain.com", "otherdomain.com:6543"),
                        Route::sni("mydomain.com", "newdomain.com:7890"),
                    ],
                ),
                Listener::passthrough(":2345", "domain-two:7657"),
            ])
        );
    }

    #[test]
    fn rejects_listener_without_port() {
        let report = validation_report(
            r#"
listen "2345" {
	proxy_to = "domain-two:7657"
}
"#,
        );
        assert!(report.starts_with("listener 1 (2345): invalid listen address"));
        assert!(report.ends_with("address 2345: missing port in address"));
    }

    #[test]
    fn rejects_proxy_to_combined_with_route() {
        let report = validation_report(
            r#"
listen ":2345" {
	proxy_to = "domain-two:7657"
	route {
		host = "somehost"
		to = "abcd:9876"
	}
}
"#,
        );
        assert_eq!(
            report,
            "listener 1 (:2345): either proxy_to or route can be set, not both"
        );
    }

    #[test]
    fn rejects_empty_listener() {
        let report = validation_report(r#"listen ":2345" {}"#);
        assert_eq!(
            report,
            "listener 1 (:2345): either proxy_to or route must be set"
        );
    }

    #[test]
    fn rejects_malformed_direct_route() {
        let report = validation_report(
            r#"
listen ":2345" {
	proxy_to = "somehost"
}
"#,
        );
        assert!(report.contains("invalid proxy_to address \"somehost\""));
        assert!(report.ends_with("address somehost: missing port in address"));
    }

    #[test]
    fn rejects_malformed_route_destination() {
        let report = validation_report(
            r#"
listen ":2345" {
	route {
		host = "somehost"
		to = "another"
	}
}
"#,
        );
        assert!(report.starts_with("listener 1 (:2345): route 1: invalid destination address"));
    }

    #[test]
    fn rejects_route_without_matcher() {
        let report = validation_report(
            r#"
listen ":2345" {
	route {
		to = "another:6543"
	}
}
"#,
        );
        assert_eq!(
            report,
            "listener 1 (:2345): route 1: at least sni or host attribute must be set"
        );
    }

    #[test]
    fn missing_route_destination_is_a_validation_error() {
        let err = parse_config(
            "test.hcl",
            r#"
listen ":2345" {
	route {
		host = "somehost"
	}
}
"#,
        )
        .unwrap_err();

        let ConfigError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(matches!(
            errors.errors(),
            [ValidationError::MissingRouteDestination { route: 1, .. }]
        ));
    }

    #[test]
    fn rejects_document_without_listeners() {
        let report = validation_report("");
        assert_eq!(report, "at least one listen block must be provided");
    }

    #[test]
    fn rejects_unknown_attributes_and_blocks() {
        for content in [
            r#"listen ":1" { proxy = "a:1" }"#,
            r#"upstream "x" {}"#,
            r#"listen ":1" { route { host = "h" to = "a:1" weight = "2" } }"#,
            r#"listen ":1" { backend { to = "a:1" } }"#,
            r#"proxy_to = "a:1""#,
        ] {
            assert!(
                matches!(
                    parse_config("test.hcl", content),
                    Err(ConfigError::Parse { .. })
                ),
                "expected parse error for {content}"
            );
        }
    }

    #[test]
    fn rejects_wrong_label_count() {
        assert!(matches!(
            parse_config("test.hcl", r#"listen { proxy_to = "a:1" }"#),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse_config("test.hcl", r#"listen ":1" ":2" { proxy_to = "a:1" }"#),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_non_string_values() {
        let err = parse_config("test.hcl", r#"listen ":1" { proxy_to = 8080 }"#).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn rejects_syntax_errors() {
        assert!(matches!(
            parse_config("broken.hcl", r#"listen ":1" { proxy_to = "#),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn load_config_reads_file() {
        let mut file = NamedTempFile::with_suffix(".hcl").unwrap();
        write!(file, "listen \":8899\" {{\n  proxy_to = \"somedomain.com:80\"\n}}\n").unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.listeners.len(), 1);
        assert_eq!(
            config.listeners[0].proxy_to.as_deref(),
            Some("somedomain.com:80")
        );
    }

    #[tokio::test]
    async fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("absent.hcl")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Access { .. }));
    }
}
