//! Per-connection handling: pick a rule, dial the backend, splice the streams.
use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};

use super::inspect::{
    MAX_PRELUDE_LEN, extract_http_host, extract_sni, host_matches, prelude_complete,
};
use crate::{config::split_host_port, core::proxy_spec::RoutingRule};

/// Route one accepted client connection. Runs on its own task and is not tied to
/// the listener's lifetime, so closing a listener never cuts open connections.
pub(super) async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    rules: &[RoutingRule],
    match_timeout: Duration,
) {
    let prelude = if rules.first().is_some_and(|rule| !rule.needs_inspection()) {
        Vec::new()
    } else {
        match read_prelude(&mut client, match_timeout).await {
            Ok(prelude) => prelude,
            Err(e) => {
                tracing::debug!(%peer, "failed to read from client: {}", e);
                return;
            }
        }
    };

    let Some(rule) = select_rule(rules, &prelude) else {
        tracing::debug!(%peer, "no route matched, closing connection");
        return;
    };
    let target = rule.target();

    let mut backend = match dial(target).await {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(%peer, backend = target, "failed to connect to backend: {}", e);
            return;
        }
    };

    if !prelude.is_empty() {
        if let Err(e) = backend.write_all(&prelude).await {
            tracing::debug!(%peer, backend = target, "failed to replay client prelude: {}", e);
            return;
        }
    }

    match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((to_backend, to_client)) => {
            tracing::debug!(
                %peer,
                backend = target,
                bytes_to_backend = to_backend + prelude.len() as u64,
                bytes_to_client = to_client,
                "connection finished"
            );
        }
        Err(e) => tracing::debug!(%peer, backend = target, "connection ended with error: {}", e),
    }
}

/// First rule that matches the prelude, in configuration order.
pub(super) fn select_rule<'a>(rules: &'a [RoutingRule], prelude: &[u8]) -> Option<&'a RoutingRule> {
    let mut sni = None;
    let mut host = None;

    rules.iter().find(|rule| match rule {
        RoutingRule::Passthrough { .. } => true,
        RoutingRule::SniMatch { sni: expected, .. } => sni
            .get_or_insert_with(|| extract_sni(prelude).ok())
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(expected)),
        RoutingRule::HostMatch { host: expected, .. } => host
            .get_or_insert_with(|| extract_http_host(prelude).ok())
            .as_deref()
            .is_some_and(|header| host_matches(expected, header)),
    })
}

async fn read_prelude(stream: &mut TcpStream, match_timeout: Duration) -> std::io::Result<Vec<u8>> {
    let deadline = Instant::now() + match_timeout;
    let mut prelude = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    while !prelude_complete(&prelude) && prelude.len() < MAX_PRELUDE_LEN {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => prelude.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(prelude)
}

/// Connect to a backend; `:port` dials the local host.
async fn dial(target: &str) -> std::io::Result<TcpStream> {
    let (host, port) = split_host_port(target)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    TcpStream::connect((host, port)).await
}
