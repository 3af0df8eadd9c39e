use crate::error::{QscError, Result};
use crate::protocol::{self, FRAME_DELIMITER};
use futures_util::future::BoxFuture;
use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

/// Byte stream a [`Connection`] can run over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Creates new, handshaken connections to one core
///
/// The pool calls this whenever it has no reusable connection.
pub trait Connector: Send + Sync {
    /// Open a connection and consume the greeting banner, giving up at `deadline`
    fn connect(&self, deadline: Instant) -> BoxFuture<'_, Result<Connection>>;
}

/// Dials a core over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, deadline: Instant) -> BoxFuture<'_, Result<Connection>> {
        Box::pin(async move {
            let target = format!("{}:{}", self.address, self.port);
            tracing::info!("Connecting to {}", target);

            let stream = timeout_at(deadline, TcpStream::connect((self.address.as_str(), self.port)))
                .await
                .map_err(|_| QscError::Timeout("connecting"))?
                .map_err(|source| QscError::Dial {
                    address: target.clone(),
                    source,
                })?;

            let _ = stream.set_nodelay(true);
            let remote_ip = stream
                .peer_addr()
                .map_err(|source| QscError::Dial {
                    address: target.clone(),
                    source,
                })?
                .ip();

            Connection::establish(stream, remote_ip, &target, deadline).await
        })
    }
}

/// One framed connection to a core
///
/// Owned by exactly one operation at a time; see [`ConnectionPool`](crate::ConnectionPool).
pub struct Connection {
    stream: BufReader<Box<dyn Transport>>,
    remote_ip: IpAddr,
    created: Instant,
}

impl Connection {
    /// Wrap a freshly opened stream and discard the core's greeting banner.
    ///
    /// The core greets every connection with a frame of arbitrary content.
    /// Bytes that follow its terminator stay buffered for the first response.
    pub async fn establish(
        stream: impl Transport + 'static,
        remote_ip: IpAddr,
        address: &str,
        deadline: Instant,
    ) -> Result<Self> {
        let stream: Box<dyn Transport> = Box::new(stream);
        let mut conn = Self {
            stream: BufReader::new(stream),
            remote_ip,
            created: Instant::now(),
        };

        let mut banner = Vec::new();
        let read = timeout_at(deadline, conn.stream.read_until(FRAME_DELIMITER, &mut banner))
            .await
            .map_err(|_| QscError::Timeout("reading new connection prompt"))?;

        match read {
            Ok(_) if banner.last() == Some(&FRAME_DELIMITER) => {
                tracing::debug!(
                    address,
                    banner_len = banner.len(),
                    "Discarded connection prompt"
                );
                Ok(conn)
            }
            Ok(_) => Err(QscError::Handshake {
                address: address.to_string(),
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before the prompt was terminated",
                ),
            }),
            Err(source) => Err(QscError::Handshake {
                address: address.to_string(),
                source,
            }),
        }
    }

    /// IP address of the core on the other end
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    /// When the connection was opened
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Write one already-delimited frame
    pub async fn write_frame(&mut self, frame: &[u8], deadline: Instant) -> Result<()> {
        let stream = &mut self.stream;
        timeout_at(deadline, async move {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| QscError::Timeout("writing request"))??;
        Ok(())
    }

    /// Read up to and including the next delimiter
    pub async fn read_frame(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        let mut frame = Vec::new();
        timeout_at(deadline, self.stream.read_until(FRAME_DELIMITER, &mut frame))
            .await
            .map_err(|_| QscError::Timeout("reading response"))??;

        if frame.last() != Some(&FRAME_DELIMITER) {
            return Err(QscError::ConnectionClosed);
        }
        Ok(frame)
    }

    /// Send a request frame and return the trimmed frame answering it
    ///
    /// Empty frames and notifications received before the answer are skipped.
    pub async fn round_trip(&mut self, request: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        tracing::debug!("Sending: {}", String::from_utf8_lossy(protocol::trim_frame(request)));
        self.write_frame(request, deadline).await?;

        loop {
            let frame = self.read_frame(deadline).await?;
            let payload = protocol::trim_frame(&frame);

            if payload.is_empty() {
                continue;
            }
            if let Some(method) = protocol::notification_method(payload) {
                tracing::debug!("Skipping {} notification", method);
                continue;
            }

            tracing::debug!("Received: {}", String::from_utf8_lossy(payload));
            return Ok(payload.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[tokio::test]
    async fn test_banner_then_frame_parse_independently() {
        let (client, mut unit) = duplex(1024);
        unit.write_all(&[0xAA, 0xBB, 0x00]).await.unwrap();
        unit.write_all(b"{\"id\":1,\"result\":[]}\0").await.unwrap();

        let mut conn = Connection::establish(client, LOCALHOST, "test", deadline())
            .await
            .unwrap();

        let frame = conn.read_frame(deadline()).await.unwrap();
        assert_eq!(frame, b"{\"id\":1,\"result\":[]}\0");
    }

    #[tokio::test]
    async fn test_banner_split_across_reads() {
        let (client, mut unit) = duplex(1024);

        let writer = tokio::spawn(async move {
            unit.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            unit.write_all(b"\"EngineStatus\"}\0").await.unwrap();
            unit
        });

        let conn = Connection::establish(client, LOCALHOST, "test", deadline()).await;
        assert!(conn.is_ok());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_banner_eof_is_handshake_error() {
        let (client, mut unit) = duplex(1024);
        unit.write_all(b"no terminator").await.unwrap();
        drop(unit);

        let err = Connection::establish(client, LOCALHOST, "test", deadline())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QscError::Handshake { .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_banner_timeout() {
        let (client, _unit) = duplex(1024);
        let deadline = Instant::now() + Duration::from_millis(50);

        let err = Connection::establish(client, LOCALHOST, "test", deadline)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QscError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_round_trip_skips_notifications_and_empty_frames() {
        let (client, mut unit) = duplex(4096);
        unit.write_all(b"\0").await.unwrap();

        let mut conn = Connection::establish(client, LOCALHOST, "test", deadline())
            .await
            .unwrap();

        let server = tokio::spawn(async move {
            let mut request = vec![0u8; 64];
            let n = unit.read(&mut request).await.unwrap();
            request.truncate(n);

            unit.write_all(b"\0").await.unwrap();
            unit.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"EngineStatus\",\"params\":{}}\0")
                .await
                .unwrap();
            unit.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":true}\0")
                .await
                .unwrap();
            (unit, request)
        });

        let response = conn.round_trip(b"ping\0", deadline()).await.unwrap();
        assert_eq!(response, b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":true}");

        let (_unit, request) = server.await.unwrap();
        assert_eq!(request, b"ping\0");
    }

    #[tokio::test]
    async fn test_read_after_close() {
        let (client, mut unit) = duplex(1024);
        unit.write_all(b"\0partial").await.unwrap();

        let mut conn = Connection::establish(client, LOCALHOST, "test", deadline())
            .await
            .unwrap();
        drop(unit);

        let err = conn.read_frame(deadline()).await.unwrap_err();
        assert!(matches!(err, QscError::ConnectionClosed));
    }
}
