//! Tokio based implementation of the [`ProxyEngine`] port.
//!
//! Every instance owns one listening socket and one accept loop. Sockets are bound
//! with `SO_REUSEADDR` and, on unix, `SO_REUSEPORT`, so the next configuration
//! generation can listen on the same port while the previous one drains.
//!
//! A listen address with an empty host (`:port`) binds `0.0.0.0` only, not the IPv6
//! wildcard. A host name is resolved with the blocking system resolver inside
//! [`ProxyInstance::start`], which runs on the orchestrator task; prefer IP literals
//! for listen addresses.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    net::{TcpListener, TcpSocket},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::split_host_port,
    core::proxy_spec::{ProxySpec, RoutingRule},
    ports::{EngineError, ProxyEngine, ProxyInstance},
};

mod connection;
pub mod inspect;

const LISTEN_BACKLOG: u32 = 1024;

/// Tuning shared by every instance the engine creates.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long to wait for the client's first bytes when a Host or SNI rule
    /// has to be evaluated.
    pub match_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            match_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TcpProxyEngine {
    options: EngineOptions,
}

impl TcpProxyEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }
}

impl ProxyEngine for TcpProxyEngine {
    fn create(&self, spec: &ProxySpec) -> Box<dyn ProxyInstance> {
        Box::new(TcpProxyInstance::new(spec, self.options.clone()))
    }
}

/// One listening socket and its routing rules.
pub struct TcpProxyInstance {
    address: String,
    rules: Arc<[RoutingRule]>,
    options: EngineOptions,
    cancel: CancellationToken,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<Result<(), EngineError>>>,
}

impl TcpProxyInstance {
    pub fn new(spec: &ProxySpec, options: EngineOptions) -> Self {
        Self {
            address: spec.interface.clone(),
            rules: spec.rules.clone().into(),
            options,
            cancel: CancellationToken::new(),
            local_addr: None,
            accept_task: None,
        }
    }

    /// The bound socket address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl ProxyInstance for TcpProxyInstance {
    fn address(&self) -> &str {
        &self.address
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.accept_task.is_some() {
            return Err(EngineError::AlreadyStarted {
                address: self.address.clone(),
            });
        }

        let bind_addr = resolve_bind_address(&self.address)?;
        let listener = bind_reusable(bind_addr).map_err(|source| EngineError::Bind {
            address: self.address.clone(),
            source,
        })?;
        self.local_addr = listener.local_addr().ok();

        tracing::info!(
            address = %self.address,
            local_addr = ?self.local_addr,
            rules = self.rules.len(),
            "listener bound"
        );

        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.address.clone(),
            self.rules.clone(),
            self.options.match_timeout,
            self.cancel.clone(),
        )));
        Ok(())
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    async fn wait(&mut self) -> Result<(), EngineError> {
        let Some(task) = self.accept_task.take() else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Task {
                address: self.address.clone(),
                message: e.to_string(),
            }),
        }
    }
}

impl Drop for TcpProxyInstance {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn resolve_bind_address(address: &str) -> Result<SocketAddr, EngineError> {
    let resolve_err = |reason: String| EngineError::Resolve {
        address: address.to_string(),
        reason,
    };

    let (host, port) = split_host_port(address).map_err(|e| resolve_err(e.to_string()))?;
    if host.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_err("no addresses found".to_string()))
}

fn bind_reusable(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(
    listener: TcpListener,
    address: String,
    rules: Arc<[RoutingRule]>,
    match_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), EngineError> {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return Err(EngineError::Closed { address });
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(%peer, %address, "connection accepted");
                    let rules = rules.clone();
                    tokio::spawn(async move {
                        connection::handle_connection(stream, peer, &rules, match_timeout).await;
                    });
                }
                Err(e) if is_transient_accept_error(&e) => {
                    tracing::debug!(%address, "accept error: {}", e);
                }
                Err(source) => {
                    return Err(EngineError::Accept { address, source });
                }
            }
        }
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
