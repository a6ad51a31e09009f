//! A minimal mock DevTools endpoint. It mirrors the wire format by hand —
//! independent of the crate's codec — so an encoding bug on either side
//! shows up as a test failure instead of cancelling itself out.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const OP_TEXT: u8 = 0x1;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

pub async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// One accepted websocket connection, already upgraded.
pub struct WsServerConn {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl WsServerConn {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = Self {
            stream,
            buf: Vec::new(),
        };
        conn.upgrade().await;
        conn
    }

    /// Accepts the TCP connection but refuses the upgrade with `status`.
    pub async fn refuse(listener: &TcpListener, status: &str) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        loop {
            if find_subsequence(&buf, b"\r\n\r\n").is_some() {
                break;
            }
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up mid-handshake");
            buf.extend_from_slice(&chunk[..n]);
        }
        let response = format!("HTTP/1.1 {status}\r\n\r\n");
        stream.write_all(response.as_bytes()).await.unwrap();
    }

    async fn upgrade(&mut self) {
        loop {
            if let Some(end) = find_subsequence(&self.buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&self.buf[..end]).to_string();
                assert!(head.starts_with("GET /devtools/"), "bad path: {head}");
                assert!(head.contains("Upgrade: websocket"));
                assert!(head.contains("Connection: Upgrade"));
                assert!(head.contains("Sec-WebSocket-Version: 13"));
                assert!(head.contains("Sec-WebSocket-Key: "));
                self.buf.drain(..end + 4);
                self.stream
                    .write_all(
                        b"HTTP/1.1 101 Switching Protocols\r\n\
                          Upgrade: websocket\r\n\
                          Connection: Upgrade\r\n\r\n",
                    )
                    .await
                    .unwrap();
                return;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up mid-handshake");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next client frame, unmasked. `None` on EOF.
    pub async fn next_frame(&mut self) -> Option<(u8, Vec<u8>)> {
        loop {
            if let Some(frame) = pop_client_frame(&mut self.buf) {
                return Some(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next text frame parsed as JSON, answering pings along the way.
    pub async fn next_command(&mut self) -> Option<Value> {
        loop {
            let (opcode, payload) = self.next_frame().await?;
            match opcode {
                OP_TEXT => return Some(serde_json::from_slice(&payload).unwrap()),
                OP_PING => self.send_raw(&server_frame(OP_PONG, &payload)).await,
                OP_CLOSE => return None,
                _ => {}
            }
        }
    }

    pub async fn send_text(&mut self, payload: &str) {
        self.send_raw(&server_frame(OP_TEXT, payload.as_bytes())).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn respond_ok(&mut self, id: u64) {
        self.send_text(&json!({"id": id, "result": {}}).to_string())
            .await;
    }
}

/// Serves commands generically: enables get `{}`, evaluate gets `2`, the
/// DOM chain resolves to one `h1` element whose text is `"Hello"`. Every
/// received command is recorded.
pub async fn serve_generic(mut conn: WsServerConn, seen: Arc<Mutex<Vec<Value>>>) {
    while let Some(cmd) = conn.next_command().await {
        seen.lock().unwrap().push(cmd.clone());
        let id = cmd["id"].as_u64().unwrap();
        let result = generic_result(&cmd);
        conn.send_text(&json!({"id": id, "result": result}).to_string())
            .await;
    }
}

pub fn generic_result(cmd: &Value) -> Value {
    match cmd["method"].as_str().unwrap_or_default() {
        "Runtime.evaluate" => {
            json!({"result": {"type": "number", "value": 2, "description": "2"}})
        }
        "DOM.getDocument" => json!({"root": {"nodeId": 1, "nodeName": "#document"}}),
        "DOM.querySelector" => json!({"nodeId": 42}),
        "DOM.resolveNode" => {
            json!({"object": {"type": "object", "objectId": "obj-42"}})
        }
        "Runtime.callFunctionOn" => {
            json!({"result": {"type": "string", "value": "Hello"}})
        }
        _ => json!({}),
    }
}

/// Encodes an unmasked server frame, picking the length form by size.
pub fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x80 | opcode];
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= 65_535 {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

fn pop_client_frame(buf: &mut Vec<u8>) -> Option<(u8, Vec<u8>)> {
    if buf.len() < 2 {
        return None;
    }
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    assert!(masked, "client frames must be masked");

    let mut offset = 2usize;
    let len = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return None;
            }
            offset = 4;
            u16::from_be_bytes([buf[2], buf[3]]) as usize
        }
        127 => {
            if buf.len() < 10 {
                return None;
            }
            offset = 10;
            u64::from_be_bytes(buf[2..10].try_into().unwrap()) as usize
        }
        short => short as usize,
    };

    let total = offset + 4 + len;
    if buf.len() < total {
        return None;
    }
    let mask = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    let mut payload: Vec<u8> = buf[offset + 4..total].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    buf.drain(..total);
    Some((opcode, payload))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
