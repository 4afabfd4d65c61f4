//! Session loop for a single connection.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use super::{ReadMode, SessionConfig, SessionEnd, SessionError, SessionSummary, CHUNK_SIZE, TERMINATOR};

/// Run the acknowledgment loop on `stream` until the peer closes it.
///
/// The caller owns the stream and is responsible for closing it once this
/// returns, whatever the outcome.
pub async fn handle_session<S>(
    stream: &mut S,
    config: &SessionConfig,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match config.mode {
        ReadMode::Byte => byte_session(stream, config).await,
        ReadMode::Chunk => chunk_session(stream, config).await,
    }
}

async fn byte_session<S>(
    stream: &mut S,
    config: &SessionConfig,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut byte = [0u8; 1];
    let mut bytes_read = 0;
    let mut acks_sent = 0;

    loop {
        let n = read_with_timeout(stream.read(&mut byte), config.idle_timeout).await?;
        if n == 0 {
            info!("Peer closed connection, nothing more to read");
            return Ok(SessionSummary {
                end: SessionEnd::PeerClosed,
                bytes_read,
                acks_sent,
            });
        }
        bytes_read += 1;

        let terminator = byte[0] == TERMINATOR;
        if terminator {
            info!(ch = %byte[0].escape_ascii(), "Message received");
        } else {
            info!(ch = %byte[0].escape_ascii(), "Received");
        }

        send_ack(stream, config).await?;
        acks_sent += 1;

        if terminator {
            break;
        }
    }

    // Terminator seen: stop acknowledging, but keep the connection open
    // until the peer closes its side.
    let discarded = drain(stream, config.idle_timeout).await?;
    if discarded > 0 {
        debug!(discarded, "Discarded input after terminator");
    }

    Ok(SessionSummary {
        end: SessionEnd::Terminator,
        bytes_read,
        acks_sent,
    })
}

async fn chunk_session<S>(
    stream: &mut S,
    config: &SessionConfig,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut bytes_read = 0;
    let mut acks_sent = 0;

    loop {
        let n = read_with_timeout(stream.read(&mut buffer), config.idle_timeout).await?;
        if n == 0 {
            trace!("Connection closed by client");
            return Ok(SessionSummary {
                end: SessionEnd::PeerClosed,
                bytes_read,
                acks_sent,
            });
        }
        bytes_read += n;

        info!(len = n, text = %String::from_utf8_lossy(&buffer[..n]), "Message received");

        send_ack(stream, config).await?;
        acks_sent += 1;
    }
}

/// Read and throw away everything until EOF, returning the byte count.
async fn drain<S>(stream: &mut S, idle_timeout: Option<Duration>) -> Result<usize, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut scratch = [0u8; CHUNK_SIZE];
    let mut discarded = 0;

    loop {
        let n = read_with_timeout(stream.read(&mut scratch), idle_timeout).await?;
        if n == 0 {
            return Ok(discarded);
        }
        discarded += n;
    }
}

async fn send_ack<S>(stream: &mut S, config: &SessionConfig) -> Result<(), SessionError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&config.ack)
        .await
        .map_err(SessionError::Write)
}

async fn read_with_timeout<F>(read: F, idle_timeout: Option<Duration>) -> Result<usize, SessionError>
where
    F: Future<Output = std::io::Result<usize>>,
{
    let result = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| SessionError::IdleTimeout(limit))?,
        None => read.await,
    };

    result.map_err(SessionError::Read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio_test::io::Builder;

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn lines(&self) -> Vec<String> {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(|line| line.trim().to_string())
                .collect()
        }
    }

    /// Route events on this thread into a buffer, one plain line per event.
    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_level(false)
            .with_target(false)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (buffer, guard)
    }

    fn byte_config() -> SessionConfig {
        SessionConfig::new(ReadMode::Byte)
    }

    fn chunk_config() -> SessionConfig {
        SessionConfig::new(ReadMode::Chunk)
    }

    #[tokio::test]
    async fn test_byte_mode_acks_every_byte() {
        let mut stream = Builder::new()
            .read(b"ab")
            .write(b"aloha")
            .write(b"aloha")
            .build();

        let summary = handle_session(&mut stream, &byte_config()).await.unwrap();
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.bytes_read, 2);
        assert_eq!(summary.acks_sent, 2);
    }

    #[tokio::test]
    async fn test_byte_mode_terminator_acks_then_lingers() {
        // "hi$" yields three acks; trailing input is read but not acknowledged.
        let mut stream = Builder::new()
            .read(b"hi$")
            .write(b"aloha")
            .write(b"aloha")
            .write(b"aloha")
            .read(b"ignored")
            .build();

        let summary = handle_session(&mut stream, &byte_config()).await.unwrap();
        assert_eq!(summary.end, SessionEnd::Terminator);
        assert_eq!(summary.bytes_read, 3);
        assert_eq!(summary.acks_sent, 3);
    }

    #[tokio::test]
    async fn test_byte_mode_logs_each_character_and_terminator() {
        let (logs, _guard) = capture_logs();
        let mut stream = Builder::new()
            .read(b"hi$")
            .write(b"aloha")
            .write(b"aloha")
            .write(b"aloha")
            .build();

        handle_session(&mut stream, &byte_config()).await.unwrap();

        let events: Vec<String> = logs
            .lines()
            .into_iter()
            .filter(|line| line.contains("ch="))
            .collect();
        assert_eq!(
            events,
            vec!["Received ch=h", "Received ch=i", "Message received ch=$"]
        );
    }

    #[tokio::test]
    async fn test_byte_mode_escapes_non_printable() {
        let (logs, _guard) = capture_logs();
        let mut stream = Builder::new().read(b"\n").write(b"aloha").build();

        handle_session(&mut stream, &byte_config()).await.unwrap();

        assert!(logs.lines().iter().any(|line| line == "Received ch=\\n"));
    }

    #[tokio::test]
    async fn test_byte_mode_immediate_eof() {
        let mut stream = Builder::new().build();

        let summary = handle_session(&mut stream, &byte_config()).await.unwrap();
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.acks_sent, 0);
    }

    #[tokio::test]
    async fn test_byte_mode_non_ascii_byte() {
        let mut stream = Builder::new().read(b"\xff").write(b"aloha").build();

        let summary = handle_session(&mut stream, &byte_config()).await.unwrap();
        assert_eq!(summary.acks_sent, 1);
    }

    #[tokio::test]
    async fn test_chunk_mode_one_ack_per_read() {
        let mut stream = Builder::new()
            .read(b"hello")
            .write(b"Ok!")
            .read(b"world, again")
            .write(b"Ok!")
            .build();

        let summary = handle_session(&mut stream, &chunk_config()).await.unwrap();
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.bytes_read, 17);
        assert_eq!(summary.acks_sent, 2);
    }

    #[tokio::test]
    async fn test_chunk_mode_dollar_is_ordinary() {
        let mut stream = Builder::new().read(b"$").write(b"Ok!").build();

        let summary = handle_session(&mut stream, &chunk_config()).await.unwrap();
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.acks_sent, 1);
    }

    #[tokio::test]
    async fn test_chunk_mode_splits_large_reads() {
        let payload = vec![b'x'; CHUNK_SIZE + 1];
        let mut stream = Builder::new()
            .read(&payload)
            .write(b"Ok!")
            .write(b"Ok!")
            .build();

        let summary = handle_session(&mut stream, &chunk_config()).await.unwrap();
        assert_eq!(summary.bytes_read, CHUNK_SIZE + 1);
        assert_eq!(summary.acks_sent, 2);
    }

    #[tokio::test]
    async fn test_custom_ack() {
        let config = SessionConfig {
            ack: Bytes::from_static(b"ACK\n"),
            ..chunk_config()
        };
        let mut stream = Builder::new().read(b"ping").write(b"ACK\n").build();

        let summary = handle_session(&mut stream, &config).await.unwrap();
        assert_eq!(summary.acks_sent, 1);
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let mut stream = Builder::new()
            .read(b"a")
            .write(b"aloha")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = handle_session(&mut stream, &byte_config()).await.unwrap_err();
        assert!(matches!(err, SessionError::Read(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[tokio::test]
    async fn test_write_error_ends_session() {
        let mut stream = Builder::new()
            .read(b"hello")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let err = handle_session(&mut stream, &chunk_config()).await.unwrap_err();
        assert!(matches!(err, SessionError::Write(_)));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let config = SessionConfig {
            idle_timeout: Some(Duration::from_millis(20)),
            ..byte_config()
        };

        let err = handle_session(&mut server, &config).await.unwrap_err();
        assert!(matches!(err, SessionError::IdleTimeout(_)));

        // Keep the client half alive until the timeout fires.
        client.shutdown().await.unwrap();
    }
}
