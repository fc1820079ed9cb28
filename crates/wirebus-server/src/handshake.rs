//! HTTP/1.1 → websocket upgrade handshake.
//!
//! Parses the request head, validates the RFC6455 upgrade headers and
//! renders either the `101 Switching Protocols` response or an error
//! response. A missing version header is answered with `426 Upgrade
//! Required` (plus the supported versions) so plain-HTTP clients get a
//! usable hint; every other defect is a `400`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use crate::errors::HandshakeError;

/// Fixed GUID appended to the client key before hashing (RFC6455 §4.2.2).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol versions this server accepts.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["13", "8", "7"];

/// A parsed HTTP/1.1 request head.
///
/// Header names are lowercased at parse time; values keep their case
/// (the accept token is derived from the key verbatim).
#[derive(Clone, Debug)]
pub struct RequestHead {
    /// HTTP method, uppercased by the client.
    pub method: String,
    /// Request target, e.g. `/ws?token=abc`.
    pub target: String,
    /// Protocol version string, e.g. `HTTP/1.1`.
    pub version: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse a request head (everything before the blank line).
    pub fn parse(head: &str) -> Result<Self, HandshakeError> {
        let mut lines = head.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::Malformed("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| HandshakeError::Malformed("missing method".into()))?;
        let target = parts
            .next()
            .ok_or_else(|| HandshakeError::Malformed("missing request target".into()))?;
        let version = parts
            .next()
            .ok_or_else(|| HandshakeError::Malformed("missing HTTP version".into()))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("bad header line {line:?}")))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
        Ok(Self {
            method: method.to_owned(),
            target: target.to_owned(),
            version: version.to_owned(),
            headers,
        })
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The query string of the request target, without the `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// Value of one query parameter, undecoded.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query()?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Accept token for a client key: `base64(sha1(key + GUID))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Validate the upgrade headers and compute the accept token.
///
/// Checks run in a fixed order so each defect gets a deterministic
/// response: method, protocol version, upgrade header, client key,
/// websocket version.
pub fn validate_upgrade(head: &RequestHead) -> Result<String, HandshakeError> {
    if head.method != "GET" {
        return Err(HandshakeError::MethodNotGet);
    }
    if head.version != "HTTP/1.1" {
        return Err(HandshakeError::UnsupportedProtocol);
    }
    let upgrade = head.header("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::NotAnUpgrade);
    }
    let key = head.header("sec-websocket-key").unwrap_or_default();
    if key.is_empty() {
        return Err(HandshakeError::MissingKey);
    }
    match head.header("sec-websocket-version") {
        None => Err(HandshakeError::UpgradeRequired),
        Some(version) if !SUPPORTED_VERSIONS.contains(&version) => {
            Err(HandshakeError::UnsupportedVersion(version.to_owned()))
        }
        Some(_) => Ok(accept_token(key)),
    }
}

/// Render the `101 Switching Protocols` response for an accept token.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// Render the error response for a rejected handshake.
pub fn error_response(error: &HandshakeError) -> String {
    match error.status() {
        426 => format!(
            "HTTP/1.1 426 Upgrade Required\r\n\
             Sec-WebSocket-Version: {}\r\n\
             Content-Length: 0\r\n\
             \r\n",
            SUPPORTED_VERSIONS.join(", ")
        ),
        _ => format!(
            "HTTP/1.1 400 Bad Request\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {error}",
            error.to_string().len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_head(extra: &str) -> String {
        format!(
            "GET /ws HTTP/1.1\r\n\
             Host: localhost\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             {extra}\r\n"
        )
    }

    #[test]
    fn rfc6455_sample_accept_token() {
        // worked example from RFC6455 §1.3
        assert_eq!(
            accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn valid_upgrade_accepted() {
        let head =
            RequestHead::parse(&upgrade_head("Sec-WebSocket-Version: 13\r\n")).unwrap();
        let accept = validate_upgrade(&head).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn all_supported_versions_accepted() {
        for version in SUPPORTED_VERSIONS {
            let head = RequestHead::parse(&upgrade_head(&format!(
                "Sec-WebSocket-Version: {version}\r\n"
            )))
            .unwrap();
            assert!(validate_upgrade(&head).is_ok(), "version {version}");
        }
    }

    #[test]
    fn missing_version_is_upgrade_required() {
        let head = RequestHead::parse(&upgrade_head("")).unwrap();
        assert_eq!(
            validate_upgrade(&head),
            Err(HandshakeError::UpgradeRequired)
        );
        let response = error_response(&HandshakeError::UpgradeRequired);
        assert!(response.starts_with("HTTP/1.1 426"));
        assert!(response.contains("Sec-WebSocket-Version: 13, 8, 7"));
    }

    #[test]
    fn unknown_version_is_bad_request() {
        let head =
            RequestHead::parse(&upgrade_head("Sec-WebSocket-Version: 6\r\n")).unwrap();
        assert_eq!(
            validate_upgrade(&head),
            Err(HandshakeError::UnsupportedVersion("6".into()))
        );
    }

    #[test]
    fn non_get_rejected() {
        let head = RequestHead::parse(
            "POST /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate_upgrade(&head), Err(HandshakeError::MethodNotGet));
    }

    #[test]
    fn missing_key_rejected() {
        let head = RequestHead::parse(
            "GET /ws HTTP/1.1\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate_upgrade(&head), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn plain_http_request_rejected() {
        let head = RequestHead::parse(
            "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate_upgrade(&head), Err(HandshakeError::NotAnUpgrade));
    }

    #[test]
    fn headers_matched_case_insensitively() {
        let head = RequestHead::parse(
            "GET /ws HTTP/1.1\r\nUPGRADE: WebSocket\r\nsec-websocket-key: abc\r\n\r\n",
        )
        .unwrap();
        assert_eq!(head.header("Upgrade"), Some("WebSocket"));
        assert_eq!(head.header("Sec-WebSocket-Key"), Some("abc"));
    }

    #[test]
    fn query_params_extracted() {
        let head =
            RequestHead::parse("GET /ws?token=abc123&x=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.query_param("token"), Some("abc123"));
        assert_eq!(head.query_param("x"), Some("1"));
        assert_eq!(head.query_param("missing"), None);
    }

    #[test]
    fn switching_protocols_response_shape() {
        let response = switching_protocols("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }
}
