use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use cdpmux_types::{Event, Message};

use crate::error::{CdpError, Result};
use crate::ws::frame::{self, FrameError, OpCode};
use crate::ws::handshake;

const READ_CHUNK: usize = 8 * 1024;

/// Exchanges protocol messages with one DevTools target over a websocket.
///
/// The client side of the socket: every outgoing frame is text, FIN, and
/// masked with a fresh key. Incoming pings are answered inline, a close
/// frame or EOF ends the stream.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Connection<T: Event> {
    stream: TcpStream,
    read_buf: BytesMut,
    /// Pong frames waiting for the socket; drained before each read.
    write_buf: BytesMut,
    max_incoming: usize,
    max_outgoing: usize,
    closed: bool,
    _marker: PhantomData<T>,
}

impl<T: Event> Connection<T> {
    /// Opens a TCP connection to `host:port` and upgrades it on
    /// `/devtools/<target_id>`.
    pub async fn connect(
        host: &str,
        port: u16,
        target_id: &str,
        connect_timeout: Duration,
        max_incoming: usize,
        max_outgoing: usize,
    ) -> Result<Self> {
        let connect = async {
            let mut stream = TcpStream::connect((host, port))
                .await
                .map_err(|err| CdpError::Connect(format!("{host}:{port}: {err}")))?;
            stream.set_nodelay(true).ok();

            let path = format!("/devtools/{target_id}");
            let key = handshake::nonce();
            let request = handshake::request(host, port, &path, &key);
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|err| CdpError::Handshake(err.to_string()))?;

            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            loop {
                match handshake::parse_response(&buf)? {
                    handshake::HandshakeState::Accepted { consumed } => {
                        buf.advance(consumed);
                        break;
                    }
                    handshake::HandshakeState::Partial => {
                        let mut chunk = [0u8; READ_CHUNK];
                        let n = tokio::io::AsyncReadExt::read(&mut stream, &mut chunk)
                            .await
                            .map_err(|err| CdpError::Handshake(err.to_string()))?;
                        if n == 0 {
                            return Err(CdpError::Handshake(
                                "connection closed before the upgrade completed".to_string(),
                            ));
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }

            Ok(Self {
                stream,
                read_buf: buf,
                write_buf: BytesMut::new(),
                max_incoming,
                max_outgoing,
                closed: false,
                _marker: PhantomData,
            })
        };

        match tokio::time::timeout(connect_timeout, connect).await {
            Ok(conn) => conn,
            Err(_) => Err(CdpError::Connect(format!(
                "{host}:{port} did not complete the handshake within {connect_timeout:?}"
            ))),
        }
    }

    /// Writes one text message to the wire, flushing queued control frames
    /// first.
    pub async fn send(&mut self, payload: &str) -> Result<()> {
        if self.closed {
            return Err(CdpError::Transport("connection is closed".to_string()));
        }
        if !self.write_buf.is_empty() {
            let pending = self.write_buf.split();
            self.stream.write_all(&pending).await?;
        }
        let mut out = BytesMut::new();
        frame::encode_text(payload, self.max_outgoing, &mut out).map_err(|err| match err {
            FrameError::SendTooLarge { .. } => CdpError::InvalidArgs(err.to_string()),
            FrameError::Alloc { .. } => CdpError::Memory(err.to_string()),
            FrameError::PayloadTooLarge { .. } => CdpError::Transport(err.to_string()),
        })?;
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Whether the socket still looks usable. Purely informational.
    pub fn is_healthy(&self) -> bool {
        !self.closed && self.stream.peer_addr().is_ok()
    }

    fn flush_control(&mut self, cx: &mut Context<'_>) -> Result<()> {
        while !self.write_buf.is_empty() {
            match Pin::new(&mut self.stream).poll_write(cx, &self.write_buf) {
                Poll::Ready(Ok(0)) => {
                    return Err(CdpError::Transport("socket closed while writing".to_string()))
                }
                Poll::Ready(Ok(n)) => self.write_buf.advance(n),
                Poll::Ready(Err(err)) => return Err(err.into()),
                Poll::Pending => break,
            }
        }
        Ok(())
    }
}

impl<T: Event + Unpin> Stream for Connection<T> {
    type Item = Result<Message<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();
        if pin.closed {
            return Poll::Ready(None);
        }

        if let Err(err) = pin.flush_control(cx) {
            pin.closed = true;
            return Poll::Ready(Some(Err(err)));
        }

        loop {
            match frame::decode(&mut pin.read_buf, pin.max_incoming) {
                Err(err) => {
                    // Oversized or unallocatable frame: drop the
                    // connection, deliver nothing.
                    pin.closed = true;
                    let err = if matches!(err, FrameError::Alloc { .. }) {
                        CdpError::Memory(err.to_string())
                    } else {
                        CdpError::Transport(err.to_string())
                    };
                    return Poll::Ready(Some(Err(err)));
                }
                Ok(Some(frame)) => match frame.opcode {
                    OpCode::Text => {
                        match serde_json::from_slice::<Message<T>>(&frame.payload) {
                            Ok(msg) => return Poll::Ready(Some(Ok(msg))),
                            Err(err) => {
                                tracing::error!(
                                    payload = %String::from_utf8_lossy(&frame.payload),
                                    "failed to parse incoming message"
                                );
                                return Poll::Ready(Some(Err(err.into())));
                            }
                        }
                    }
                    OpCode::Ping => {
                        frame::encode(
                            OpCode::Pong,
                            &frame.payload,
                            Some(rand::random()),
                            &mut pin.write_buf,
                        );
                        if let Err(err) = pin.flush_control(cx) {
                            pin.closed = true;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                    OpCode::Pong => {}
                    OpCode::Close => {
                        pin.closed = true;
                        return Poll::Ready(None);
                    }
                    OpCode::Continuation | OpCode::Binary | OpCode::Other(_) => {
                        tracing::warn!(opcode = ?frame.opcode, "skipping unexpected frame");
                    }
                },
                Ok(None) => {
                    pin.read_buf.reserve(READ_CHUNK);
                    let mut chunk = [0u8; READ_CHUNK];
                    let mut read_buf = ReadBuf::new(&mut chunk);
                    match Pin::new(&mut pin.stream).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => {
                            let filled = read_buf.filled();
                            if filled.is_empty() {
                                pin.closed = true;
                                return Poll::Ready(None);
                            }
                            pin.read_buf.extend_from_slice(filled);
                        }
                        Poll::Ready(Err(err)) => {
                            pin.closed = true;
                            return Poll::Ready(Some(Err(err.into())));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }
}
