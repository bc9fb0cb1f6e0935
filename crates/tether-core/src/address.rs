//! `host:port` parsing helpers

/// Port assumed when an API endpoint URL does not name one
pub const DEFAULT_API_PORT: u16 = 443;

/// Extract the canonical `host:port` from an API endpoint URL.
///
/// The explicit port is kept as written; without one the port is 443
/// regardless of scheme. Returns an empty string for empty, unparsable or
/// scheme-less endpoints (`1.2.3.4:6443` is not a URL) so the result never
/// matches a real dial target.
pub fn api_host_port(endpoint: &str) -> String {
    if endpoint.is_empty() {
        return String::new();
    }

    let uri: http::Uri = match endpoint.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::debug!("unparsable API endpoint {:?}: {}", endpoint, e);
            return String::new();
        }
    };

    if uri.scheme().is_none() {
        tracing::debug!("API endpoint {:?} has no scheme", endpoint);
        return String::new();
    }

    match uri.authority() {
        Some(authority) if !authority.host().is_empty() => format!(
            "{}:{}",
            authority.host(),
            authority.port_u16().unwrap_or(DEFAULT_API_PORT)
        ),
        _ => String::new(),
    }
}

/// Split `host:port` into its parts.
///
/// Bracketed IPv6 hosts are unwrapped. Returns `None` when there is no
/// port separator or an unbracketed host contains further colons.
pub fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if port.contains(':') {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = address.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some((host, port))
}

/// Join a host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
