use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CdpError;

/// 16 random bytes, base64-encoded, as the `Sec-WebSocket-Key` value.
pub(crate) fn nonce() -> String {
    let key: [u8; 16] = rand::random();
    STANDARD.encode(key)
}

/// Builds the HTTP/1.1 upgrade request for `path` (e.g.
/// `/devtools/page/<id>`).
pub(crate) fn request(host: &str, port: u16, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// Outcome of scanning the buffered bytes for the upgrade response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    /// Header terminator not buffered yet.
    Partial,
    /// Switch succeeded; `consumed` bytes belong to the response, the rest
    /// is frame data.
    Accepted { consumed: usize },
}

/// Parses the server's status line out of `buf`. Anything but a `101` is a
/// fatal handshake error.
pub(crate) fn parse_response(buf: &[u8]) -> Result<HandshakeState, CdpError> {
    let Some(end) = find_header_end(buf) else {
        return Ok(HandshakeState::Partial);
    };
    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| CdpError::Handshake("response is not valid UTF-8".to_string()))?;
    let status_line = head.lines().next().unwrap_or_default();

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.1") {
        return Err(CdpError::Handshake(format!(
            "unexpected status line {status_line:?}"
        )));
    }
    if status != "101" {
        return Err(CdpError::Handshake(format!(
            "server refused the upgrade with status {status}"
        )));
    }
    Ok(HandshakeState::Accepted { consumed: end })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_upgrade_headers() {
        let req = request("127.0.0.1", 9222, "/devtools/page/AB12", "a2V5a2V5a2V5a2V5a2V5");
        assert!(req.starts_with("GET /devtools/page/AB12 HTTP/1.1\r\n"));
        assert!(req.contains("Host: 127.0.0.1:9222\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Connection: Upgrade\r\n"));
        assert!(req.contains("Sec-WebSocket-Key: a2V5a2V5a2V5a2V5a2V5\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn nonce_is_16_random_bytes() {
        let one = nonce();
        let decoded = STANDARD.decode(&one).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_ne!(one, nonce());
    }

    #[test]
    fn accepts_switching_protocols() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x00";
        match parse_response(raw).unwrap() {
            HandshakeState::Accepted { consumed } => {
                assert_eq!(&raw[consumed..], b"\x81\x00");
            }
            HandshakeState::Partial => panic!("header was complete"),
        }
    }

    #[test]
    fn partial_header_waits_for_more() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgr";
        assert_eq!(parse_response(raw).unwrap(), HandshakeState::Partial);
    }

    #[test]
    fn non_101_status_is_fatal() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\n";
        let err = parse_response(raw).unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
