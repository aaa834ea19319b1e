//! TCP accept loop. Each connection runs in its own task, bounded by a
//! semaphore; shutdown stops accepting and drains in-flight workers.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::Semaphore,
    task::JoinSet,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    handler::{handle_connection, Outcome, RelayState},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ListenerOptions {
    pub max_connections: usize,
    pub drain_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_connections: 64,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for ListenerOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_connections: cfg.max_connections,
            drain_timeout: cfg.drain_timeout,
        }
    }
}

pub struct Listener {
    inner: TcpListener,
    state: RelayState,
    opts: ListenerOptions,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, state: RelayState, opts: ListenerOptions) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner, state, opts })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then give in-flight workers
    /// up to `drain_timeout` to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self { inner, state, opts } = self;
        let permits = Arc::new(Semaphore::new(opts.max_connections.max(1)));
        let mut workers: JoinSet<Outcome> = JoinSet::new();

        tracing::info!(addr = ?inner.local_addr().ok(), "relay listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    log_worker_exit(joined);
                }
                accepted = inner.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            // Usually fd exhaustion; back off instead of spinning.
                            tracing::warn!("accept failed: {e}");
                            sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let Ok(permit) = permits.clone().try_acquire_owned() else {
                        tracing::warn!(%peer, "connection limit reached, dropping peer");
                        continue;
                    };

                    let state = state.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        serve(state, stream, peer).await
                    });
                }
            }
        }

        drop(inner);
        tracing::info!(in_flight = workers.len(), "relay listener stopping");

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                log_worker_exit(joined);
            }
        };
        if timeout(opts.drain_timeout, drain).await.is_err() {
            tracing::warn!(
                remaining = workers.len(),
                "drain deadline passed, aborting workers"
            );
            workers.abort_all();
        }

        Ok(())
    }
}

async fn serve(state: RelayState, stream: TcpStream, peer: SocketAddr) -> Outcome {
    let host = peer.ip().to_canonical().to_string();
    tracing::debug!(%host, port = peer.port(), "accepted connection");
    handle_connection(&state, stream, &host).await
}

fn log_worker_exit(joined: std::result::Result<Outcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => tracing::debug!(?outcome, "connection finished"),
        Err(e) if e.is_panic() => tracing::error!("connection worker panicked: {e}"),
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blacklist::Blacklist,
        domain::Destination,
        handler::ConnectionLimits,
        sections::{MemoryStore, SectionRegistry},
        sink::port::RelaySink,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        sync::{mpsc, Mutex},
        task::JoinHandle,
    };

    struct ChannelSink(mpsc::UnboundedSender<(String, String)>);

    #[async_trait::async_trait]
    impl RelaySink for ChannelSink {
        async fn emit(&self, destination: &Destination, text: &str) -> Result<()> {
            let _ = self.0.send((destination.0.clone(), text.to_string()));
            Ok(())
        }
    }

    struct Running {
        addr: SocketAddr,
        shutdown: CancellationToken,
        handle: JoinHandle<Result<()>>,
        relayed: mpsc::UnboundedReceiver<(String, String)>,
    }

    async fn start(opts: ListenerOptions, fail_max: u32) -> Running {
        let mut reg = SectionRegistry::load(Box::new(MemoryStore::default())).unwrap();
        reg.define("ivar", "ivarpw", "#test").await.unwrap();

        let (tx, relayed) = mpsc::unbounded_channel();
        let state = RelayState {
            sections: reg.into_shared(),
            blacklist: Arc::new(Mutex::new(Blacklist::new(
                fail_max,
                Duration::from_secs(60),
            ))),
            sink: Arc::new(ChannelSink(tx)),
            limits: ConnectionLimits {
                read_timeout: Duration::from_secs(5),
                max_line_bytes: 1024,
            },
        };

        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), state, opts)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(listener.run(shutdown.clone()));

        Running {
            addr,
            shutdown,
            handle,
            relayed,
        }
    }

    async fn send(addr: SocketAddr, line: &[u8]) -> String {
        let mut s = TcpStream::connect(addr).await.unwrap();
        // The server may hang up without reading (blocked or over the limit).
        let _ = s.write_all(line).await;
        let _ = s.shutdown().await;
        let mut reply = String::new();
        let _ = s.read_to_string(&mut reply).await;
        reply
    }

    #[tokio::test]
    async fn end_to_end_scenarios() {
        let mut rt = start(ListenerOptions::default(), 100).await;

        assert_eq!(send(rt.addr, b"ivar;ivarpw;ivar data\n").await, "");
        let got = timeout(Duration::from_secs(2), rt.relayed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, ("#test".to_string(), "ivar data".to_string()));

        assert_eq!(
            send(rt.addr, b"ivar;wrongpw;ivar data\n").await,
            "Bad password...\n"
        );
        assert_eq!(
            send(rt.addr, b"unknown;x;ivar data\n").await,
            "No such section...\n"
        );
        assert_eq!(
            send(rt.addr, b"just some text\n").await,
            "Illegal format...\n"
        );
        assert!(rt.relayed.try_recv().is_err());

        rt.shutdown.cancel();
        rt.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn blocked_peer_gets_no_reply() {
        let mut rt = start(ListenerOptions::default(), 2).await;

        send(rt.addr, b"ivar;bad;x\n").await;
        send(rt.addr, b"ivar;bad;x\n").await;
        assert_eq!(send(rt.addr, b"ivar;bad;x\n").await, "");
        assert_eq!(send(rt.addr, b"ivar;ivarpw;x\n").await, "");
        assert!(rt.relayed.try_recv().is_err());

        rt.shutdown.cancel();
        rt.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn connections_over_the_limit_are_dropped() {
        let mut rt = start(
            ListenerOptions {
                max_connections: 1,
                drain_timeout: Duration::from_secs(2),
            },
            100,
        )
        .await;

        // Holds the only permit while it waits for a line.
        let mut idle = TcpStream::connect(rt.addr).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(send(rt.addr, b"ivar;wrongpw;x\n").await, "");

        idle.write_all(b"ivar;ivarpw;late\n").await.unwrap();
        let got = timeout(Duration::from_secs(2), rt.relayed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.1, "late");

        rt.shutdown.cancel();
        rt.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_worker() {
        let mut rt = start(ListenerOptions::default(), 100).await;

        let mut slow = TcpStream::connect(rt.addr).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        rt.shutdown.cancel();

        // The listener stopped accepting, but this worker still completes.
        slow.write_all(b"ivar;ivarpw;drained\n").await.unwrap();
        let got = timeout(Duration::from_secs(2), rt.relayed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.1, "drained");

        rt.handle.await.unwrap().unwrap();
        assert!(TcpStream::connect(rt.addr).await.is_err());
    }
}
