//! Output endpoint handling.

use url::Url;

use crate::conditions::OutputType;

/// Prefix `raw` with the type's default scheme when it is a bare `host:port`.
pub fn promote(raw: &str, output_type: OutputType, has_secret: bool) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{}://{raw}", output_type.default_scheme(has_secret))
    }
}

/// Parse an endpoint, requiring a host.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, String> {
    let url = Url::parse(endpoint).map_err(|e| format!("invalid URL {endpoint:?}: {e}"))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(format!("invalid URL {endpoint:?}: missing host")),
    }
}

/// Host and port of an endpoint, falling back to the type's default port.
pub fn host_port(url: &Url, output_type: OutputType) -> (String, u16) {
    let host = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .unwrap_or_default();
    let port = url.port().unwrap_or_else(|| output_type.default_port());
    (host, port)
}
