//! Accept loop and line echo handler.
//!
//! Each process answers `<pid>: <line>`, which makes it visible which
//! generation served a connection across restarts.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shed::{ConnectionGuard, ConnectionTracker, Listener};

/// Async side of a handed-off listener.
pub enum Acceptor {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Acceptor {
    /// Register a listener duplicate with the runtime.
    pub fn from_listener(listener: Listener) -> io::Result<Self> {
        match listener {
            Listener::Tcp(l) => {
                l.set_nonblocking(true)?;
                Ok(Acceptor::Tcp(TcpListener::from_std(l)?))
            }
            Listener::Unix(l) => {
                l.set_nonblocking(true)?;
                Ok(Acceptor::Unix(UnixListener::from_std(l)?))
            }
            Listener::Udp(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "datagram sockets cannot be served by the echo server",
            )),
        }
    }

    async fn accept(&self, tracker: &ConnectionTracker) -> io::Result<()> {
        match self {
            Acceptor::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                spawn_echo(stream, peer.to_string(), tracker.guard());
            }
            Acceptor::Unix(l) => {
                let (stream, _) = l.accept().await?;
                spawn_echo(stream, "unix".to_string(), tracker.guard());
            }
        }
        Ok(())
    }
}

/// Accept until `stop` fires. Accepted connections outlive the loop.
pub async fn run(acceptor: Acceptor, stop: CancellationToken, tracker: ConnectionTracker) {
    info!("Accepting connections");

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                info!(active_connections = tracker.active(), "Stopped accepting");
                break;
            }
            result = acceptor.accept(&tracker) => {
                if let Err(e) = result {
                    warn!(error = %e, "Accept failed");
                }
            }
        }
    }
}

fn spawn_echo<S>(stream: S, peer: String, guard: ConnectionGuard)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let _guard = guard;
        debug!(peer = %peer, "Connection accepted");
        match echo(stream).await {
            Ok(lines) => debug!(peer = %peer, lines, "Connection closed"),
            Err(e) => debug!(peer = %peer, error = %e, "Connection failed"),
        }
    });
}

async fn echo<S>(stream: S) -> io::Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pid = std::process::id();
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut count = 0;

    while let Some(line) = lines.next_line().await? {
        writer.write_all(format!("{}: {}\n", pid, line).as_bytes()).await?;
        count += 1;
    }

    writer.shutdown().await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_echo_prefixes_pid() {
        let (client, server) = tokio::io::duplex(1024);
        let handle = tokio::spawn(echo(server));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(b"one\ntwo\n").await.unwrap();
        write_half.shutdown().await.unwrap();

        let mut out = String::new();
        read_half.read_to_string(&mut out).await.unwrap();

        let pid = std::process::id();
        assert_eq!(out, format!("{pid}: one\n{pid}: two\n"));
        assert_eq!(handle.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop_but_not_connections() {
        let listener = shed::acquire_from("127.0.0.1:0", None).unwrap();
        let Listener::Tcp(std_listener) = &listener else {
            unreachable!()
        };
        let addr = std_listener.local_addr().unwrap();

        let acceptor = Acceptor::from_listener(listener).unwrap();
        let stop = CancellationToken::new();
        let tracker = ConnectionTracker::new();
        let server = tokio::spawn(run(acceptor, stop.clone(), tracker.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hi\n").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).ends_with(": hi\n"));
        assert_eq!(tracker.active(), 1);

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();

        // Still served after the accept loop is gone.
        stream.write_all(b"again\n").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).ends_with(": again\n"));

        drop(stream);
        assert!(tracker.drain(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_udp_is_rejected() {
        let listener = Listener::from(std::net::UdpSocket::bind("127.0.0.1:0").unwrap());
        assert!(Acceptor::from_listener(listener).is_err());
    }
}
