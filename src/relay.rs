//! Bidirectional relay between the client and the outbound stream.
//!
//! Runs after the SUCCEEDED reply is written. Bytes are opaque from
//! here on; no SOCKS framing is read or written again on either
//! stream.

use crate::events::{Event, EventSink};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Per-direction copy buffer size
const BUFFER_SIZE: usize = 8192;

/// Outcome of a finished relay
#[derive(Debug)]
pub struct RelayOutcome {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
    pub had_error: bool,
}

/// splice couples two duplex streams until both directions have seen
/// end-of-stream or either direction errors.
///
/// End-of-stream on one side shuts down the peer's write half but
/// lets the opposite direction keep draining. An error aborts the
/// sibling direction, dropping both streams. The direction tasks are
/// held in abort-on-drop guards, so cancelling this future (server
/// close) also cancels them and releases both sockets.
pub async fn splice<C, R>(client: C, remote: R, events: Arc<dyn EventSink>) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (remote_read, remote_write) = tokio::io::split(remote);

    let mut upstream = Direction(tokio::spawn(pipe(client_read, remote_write, true, events.clone())));
    let mut downstream = Direction(tokio::spawn(pipe(remote_read, client_write, false, events)));

    let mut outcome = RelayOutcome {
        client_to_remote: 0,
        remote_to_client: 0,
        had_error: false,
    };

    let upstream_first = tokio::select! {
        result = &mut upstream.0 => {
            settle(result, &mut outcome.client_to_remote, &mut outcome.had_error);
            true
        }
        result = &mut downstream.0 => {
            settle(result, &mut outcome.remote_to_client, &mut outcome.had_error);
            false
        }
    };
    let mut remaining = if upstream_first { downstream } else { upstream };

    if outcome.had_error {
        // Tear the surviving direction down with its stream halves
        remaining.0.abort();
        let _ = (&mut remaining.0).await;
    } else {
        // First direction hit EOF; the other may still drain
        let result = (&mut remaining.0).await;
        let total = if upstream_first {
            &mut outcome.remote_to_client
        } else {
            &mut outcome.client_to_remote
        };
        settle(result, total, &mut outcome.had_error);
    }

    outcome
}

/// One relay direction; aborts its task when dropped so the stream
/// halves it owns cannot outlive the session
struct Direction(tokio::task::JoinHandle<io::Result<u64>>);

impl Drop for Direction {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// settle folds one direction's result into the outcome
fn settle(
    result: Result<io::Result<u64>, tokio::task::JoinError>,
    total: &mut u64,
    had_error: &mut bool,
) {
    match result {
        Ok(Ok(n)) => *total = n,
        Ok(Err(e)) => {
            debug!("relay direction errored: {e}");
            *had_error = true;
        }
        Err(e) => {
            debug!("relay task failed: {e}");
            *had_error = true;
        }
    }
}

/// pipe copies reader to writer one bounded chunk at a time, emitting
/// ProxyData per chunk; shuts the writer down on EOF
async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    from_client: bool,
    events: Arc<dyn EventSink>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }

        events.emit(Event::ProxyData {
            from_client,
            data: &buffer[..n],
        });

        writer.write_all(&buffer[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(NullSink)
    }

    #[tokio::test]
    async fn relay_is_transparent_both_ways() {
        let (mut client, server_side) = duplex(1024);
        let (mut remote, remote_side) = duplex(1024);

        let relay = tokio::spawn(splice(server_side, remote_side, sink()));

        client.write_all(b"from client").await.unwrap();
        let mut buf = [0u8; 11];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from client");

        remote.write_all(b"from remote").await.unwrap();
        let mut buf = [0u8; 11];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from remote");

        drop(client);
        drop(remote);
        let outcome = relay.await.unwrap();
        assert_eq!(outcome.client_to_remote, 11);
        assert_eq!(outcome.remote_to_client, 11);
        assert!(!outcome.had_error);
    }

    #[tokio::test]
    async fn relay_survives_large_transfer() {
        let (mut client, server_side) = duplex(4096);
        let (mut remote, remote_side) = duplex(4096);

        let relay = tokio::spawn(splice(server_side, remote_side, sink()));

        let payload = vec![0xA5u8; 200_000];
        let writer = {
            let payload = payload.clone();
            tokio::spawn(async move {
                client.write_all(&payload).await.unwrap();
                client.shutdown().await.unwrap();
                client
            })
        };

        let mut received = vec![0u8; payload.len()];
        remote.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);

        let client = writer.await.unwrap();
        drop(client);
        drop(remote);
        let outcome = relay.await.unwrap();
        assert_eq!(outcome.client_to_remote, payload.len() as u64);
    }

    #[tokio::test]
    async fn eof_on_one_side_propagates_and_other_drains() {
        let (mut client, server_side) = duplex(1024);
        let (mut remote, remote_side) = duplex(1024);

        let relay = tokio::spawn(splice(server_side, remote_side, sink()));

        // Client finishes writing and half-closes
        client.write_all(b"last words").await.unwrap();
        client.shutdown().await.unwrap();

        // Remote sees the data, then EOF
        let mut buf = [0u8; 10];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"last words");
        assert_eq!(remote.read(&mut [0u8; 1]).await.unwrap(), 0);

        // The reverse direction still works while draining
        remote.write_all(b"response").await.unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response");

        drop(remote);
        drop(client);
        let outcome = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.had_error);
        assert_eq!(outcome.client_to_remote, 10);
        assert_eq!(outcome.remote_to_client, 8);
    }

    #[tokio::test]
    async fn cancelling_splice_releases_both_streams() {
        let (mut client, server_side) = duplex(1024);
        let (mut remote, remote_side) = duplex(1024);

        // Dropping the splice future mid-relay (as server close does)
        // must abort the direction tasks holding the stream halves
        let relay = tokio::time::timeout(
            Duration::from_millis(50),
            splice(server_side, remote_side, sink()),
        );
        assert!(relay.await.is_err());

        let mut buf = [0u8; 1];
        let eof = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf)).await;
        assert_eq!(eof.unwrap().unwrap(), 0, "client half still held");
        let eof = tokio::time::timeout(Duration::from_secs(1), remote.read(&mut buf)).await;
        assert_eq!(eof.unwrap().unwrap(), 0, "remote half still held");
    }

    #[tokio::test]
    async fn proxy_data_events_carry_chunks() {
        use crate::events::Event;
        use std::sync::Mutex;

        struct ByteCounter(Mutex<(u64, u64)>);
        impl EventSink for ByteCounter {
            fn emit(&self, event: Event<'_>) {
                if let Event::ProxyData { from_client, data } = event {
                    let mut counts = self.0.lock().unwrap();
                    if from_client {
                        counts.0 += data.len() as u64;
                    } else {
                        counts.1 += data.len() as u64;
                    }
                }
            }
        }

        let counter = Arc::new(ByteCounter(Mutex::new((0, 0))));
        let events: Arc<dyn EventSink> = counter.clone();
        let (mut client, server_side) = duplex(1024);
        let (mut remote, remote_side) = duplex(1024);

        let relay = tokio::spawn(splice(server_side, remote_side, events));

        client.write_all(b"ping").await.unwrap();
        remote.write_all(b"pong!!").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(client);
        drop(remote);
        relay.await.unwrap();

        let counts = counter.0.lock().unwrap();
        assert_eq!(counts.0, 4);
        assert_eq!(counts.1, 6);
    }
}
