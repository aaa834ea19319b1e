//! Per-connection request handling.
//!
//! Order is fixed: blacklist check, read one line, parse, section lookup,
//! password comparison. Only the last step can reach the relay sink.

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
    time::timeout,
};

use crate::{
    blacklist::Blacklist,
    config::Config,
    domain::Destination,
    errors::Error,
    protocol::{parse_line, Reply},
    sections::SharedRegistry,
    sink::port::RelaySink,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub max_line_bytes: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            max_line_bytes: 8192,
        }
    }
}

impl From<&Config> for ConnectionLimits {
    fn from(cfg: &Config) -> Self {
        Self {
            read_timeout: cfg.read_timeout,
            max_line_bytes: cfg.max_line_bytes,
        }
    }
}

/// State shared by every connection worker.
#[derive(Clone)]
pub struct RelayState {
    pub sections: SharedRegistry,
    pub blacklist: Arc<Mutex<Blacklist>>,
    pub sink: Arc<dyn RelaySink>,
    pub limits: ConnectionLimits,
}

/// Terminal state of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Peer host is blacklisted; closed without reading.
    Blocked,
    /// Peer went away, timed out or failed at the socket level. No reply, no accounting.
    Dropped,
    /// Request authenticated and handed to the sink.
    Relayed,
    /// Request refused; `Reply` was written back and a failure recorded.
    Rejected(Reply),
}

pub async fn handle_connection<S>(state: &RelayState, mut stream: S, host: &str) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if state.blacklist.lock().await.on_list(host) {
        tracing::info!(%host, "refusing connection from blocked host");
        return Outcome::Blocked;
    }

    let result = match read_request_line(&mut stream, state.limits).await {
        Ok(Some(line)) => authenticate(state, &line).await,
        Ok(None) => {
            tracing::debug!(%host, "peer closed before sending a full line");
            return Outcome::Dropped;
        }
        Err(Error::Timeout) => {
            tracing::debug!(%host, "timed out waiting for request line");
            return Outcome::Dropped;
        }
        Err(Error::Io(e)) => {
            tracing::debug!(%host, "read failed: {e}");
            return Outcome::Dropped;
        }
        Err(e) => Err(e),
    };

    match result {
        Ok((destination, payload)) => {
            relay(state, host, &destination, &payload).await;
            Outcome::Relayed
        }
        Err(e) => reject(state, &mut stream, host, e).await,
    }
}

/// Upper bound on bytes discarded after an over-long line before replying.
const DISCARD_LIMIT: usize = 64 * 1024;

/// Read one terminated line, bounded by `limits`. The cap applies to the
/// line content; the `\n` or `\r\n` terminator is not counted.
///
/// `Ok(None)` means the peer disconnected before a full line arrived.
async fn read_request_line<S>(stream: &mut S, limits: ConnectionLimits) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let cap = limits.max_line_bytes.max(1);
    let mut buf = Vec::with_capacity(256);

    let read = {
        let mut reader = BufReader::new((&mut *stream).take(cap as u64 + 2));
        timeout(limits.read_timeout, reader.read_until(b'\n', &mut buf)).await
    };
    let n = read.map_err(|_| Error::Timeout)??;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() >= cap + 2 {
            discard_rest_of_line(stream, limits.read_timeout).await;
            return Err(Error::Format);
        }
        return Ok(None);
    }

    let content = buf.len() - if buf.ends_with(b"\r\n") { 2 } else { 1 };
    if content > cap {
        return Err(Error::Format);
    }

    String::from_utf8(buf).map(Some).map_err(|_| Error::Format)
}

/// Consume what is left of an over-long line so closing the socket does not
/// reset the connection before the peer has read our reply.
async fn discard_rest_of_line<S>(stream: &mut S, within: Duration)
where
    S: AsyncRead + Unpin,
{
    let discard = async {
        let mut chunk = [0u8; 1024];
        let mut left = DISCARD_LIMIT;
        while left > 0 {
            let n = stream.read(&mut chunk).await?;
            if n == 0 || chunk[..n].contains(&b'\n') {
                break;
            }
            left = left.saturating_sub(n);
        }
        Ok::<_, std::io::Error>(())
    };
    let _ = timeout(within, discard).await;
}

/// Resolve and authenticate a request line.
async fn authenticate(state: &RelayState, line: &str) -> Result<(Destination, String)> {
    let req = parse_line(line)?;

    // Clone out of the lock: a concurrent kill may race with this request.
    let section = state
        .sections
        .lock()
        .await
        .lookup(&req.section)
        .cloned()
        .ok_or_else(|| Error::NoSuchSection(req.section.clone()))?;

    if section.secret != req.secret {
        return Err(Error::BadPassword);
    }

    tracing::debug!(section = %section.name, "authenticated request");
    Ok((section.destination, req.payload))
}

async fn relay(state: &RelayState, host: &str, destination: &Destination, payload: &str) {
    state.blacklist.lock().await.register(host, true);

    if let Err(e) = state.sink.emit(destination, payload).await {
        tracing::warn!(%host, %destination, "relay sink failed: {e}");
        return;
    }
    tracing::info!(%host, %destination, bytes = payload.len(), "relayed message");
}

async fn reject<S>(state: &RelayState, stream: &mut S, host: &str, err: Error) -> Outcome
where
    S: AsyncWrite + Unpin,
{
    let Some(reply) = Reply::for_error(&err) else {
        tracing::warn!(%host, "dropping connection: {err}");
        return Outcome::Dropped;
    };

    state.blacklist.lock().await.register(host, false);
    tracing::warn!(%host, "rejected request: {err}");

    // Best-effort: the peer may already be gone.
    let _ = stream.write_all(reply.line().as_bytes()).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;

    Outcome::Rejected(reply)
}
