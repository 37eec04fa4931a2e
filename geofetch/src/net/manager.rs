//! Per-host connection manager.
//!
//! One manager exists per distinct [`Host`], created lazily and kept for
//! the process lifetime. Each manager is an actor owning a FIFO queue of
//! pending requests, the count of in-flight requests, and a bounded pool
//! of persistent connections; all of that state is confined to the
//! manager task and reached only through message passing.
//!
//! Dispatch rules:
//! - requests leave the queue in FIFO order while `active` stays under
//!   the concurrency cap and an idle connection exists or can be opened
//! - a request whose caller has gone away is dropped before it is sent
//! - at most one connection-open attempt runs at a time; a failed open
//!   fails every queued request and clears the queue
//! - a request lost to a keep-alive race is reinserted at the FRONT of
//!   the queue so it cannot starve behind newer arrivals

use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::net::connection::{open_stream, spawn_connection, NetStream};
use crate::net::host::Host;
use crate::net::request::Request;
use crate::net::response::Response;
use crate::net::types::{NetConfig, NetError};

/// Commands accepted by the manager task.
enum Command {
    Submit(Request),
    SetMaxConcurrent(usize),
}

/// Events flowing back from connection and connect tasks.
pub(crate) enum Event {
    /// A connection-open attempt finished
    ConnectFinished(Result<NetStream, NetError>),
    /// A connection completed a response
    Finished { conn_id: u64, reusable: bool },
    /// A connection died; `requeue` carries a request that was attached
    /// but never answered
    Closed {
        conn_id: u64,
        requeue: Option<Request>,
    },
}

/// Handle to one per-host manager.
///
/// Cloning is cheap; all clones address the same actor.
#[derive(Clone)]
pub struct HostManager {
    tx: mpsc::UnboundedSender<Command>,
}

impl HostManager {
    /// Spawn the manager actor for `host`.
    pub fn spawn(host: Host, config: NetConfig, max_concurrent: usize) -> Self {
        let (tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = ManagerTask {
            host,
            config,
            pending: VecDeque::new(),
            active: 0,
            max_concurrent: max_concurrent.max(1),
            connections: Vec::new(),
            connecting: false,
            next_conn_id: 0,
            events: event_tx,
        };
        tokio::spawn(task.run(cmd_rx, event_rx));

        Self { tx }
    }

    /// Enqueue a GET for `path` with extra headers; the completion
    /// arrives on the returned receiver.
    ///
    /// Submission is fire-and-forget onto the manager task, so it is safe
    /// from any task or thread.
    pub fn submit(
        &self,
        path: String,
        headers: Vec<(String, String)>,
    ) -> oneshot::Receiver<Result<Response, NetError>> {
        let (request, rx) = Request::new(path, headers);
        let _ = self.tx.send(Command::Submit(request));
        rx
    }

    /// Adjust the concurrency cap.
    ///
    /// Lowering the cap never interrupts in-flight requests; it only
    /// throttles future dispatch.
    pub fn set_max_concurrent(&self, max: usize) {
        let _ = self.tx.send(Command::SetMaxConcurrent(max));
    }
}

struct ConnectionSlot {
    id: u64,
    assign: mpsc::Sender<Request>,
    busy: bool,
}

struct ManagerTask {
    host: Host,
    config: NetConfig,
    pending: VecDeque<Request>,
    active: usize,
    max_concurrent: usize,
    connections: Vec<ConnectionSlot>,
    connecting: bool,
    next_conn_id: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl ManagerTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!(host = %self.host, max_concurrent = self.max_concurrent, "Host manager started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit(request)) => self.pending.push_back(request),
                    Some(Command::SetMaxConcurrent(max)) => {
                        debug!(host = %self.host, max, "Concurrency cap updated");
                        self.max_concurrent = max.max(1);
                    }
                    // All handles dropped; retire. Connection tasks exit
                    // when their assignment senders drop with us.
                    None => break,
                },
                event = events.recv() => {
                    // The task holds an event sender itself, so the
                    // channel cannot close while we run.
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
            }
            self.work_off_queue();
        }

        debug!(host = %self.host, "Host manager stopped");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ConnectFinished(Ok(stream)) => {
                self.connecting = false;
                let id = self.next_conn_id;
                self.next_conn_id += 1;
                let assign = spawn_connection(
                    id,
                    stream,
                    self.host.clone(),
                    self.config.clone(),
                    self.events.clone(),
                );
                self.connections.push(ConnectionSlot {
                    id,
                    assign,
                    busy: false,
                });
                trace!(host = %self.host, conn = id, pool = self.connections.len(), "Connection pooled");
            }

            Event::ConnectFinished(Err(error)) => {
                self.connecting = false;
                warn!(
                    host = %self.host,
                    error = %error,
                    failed_requests = self.pending.len(),
                    "Connection open failed; failing queued requests"
                );
                // Future submissions trigger a fresh connect attempt.
                for request in self.pending.drain(..) {
                    request.fail(error.clone());
                }
            }

            Event::Finished { conn_id, reusable } => {
                self.active = self.active.saturating_sub(1);
                if let Some(index) = self.connections.iter().position(|c| c.id == conn_id) {
                    if reusable {
                        self.connections[index].busy = false;
                    } else {
                        self.connections.remove(index);
                    }
                }
            }

            Event::Closed { conn_id, requeue } => {
                self.active = self.active.saturating_sub(1);
                if let Some(index) = self.connections.iter().position(|c| c.id == conn_id) {
                    self.connections.remove(index);
                }
                if let Some(request) = requeue {
                    trace!(host = %self.host, conn = conn_id, "Requeueing request from lost race");
                    self.pending.push_front(request);
                }
            }
        }
    }

    fn work_off_queue(&mut self) {
        loop {
            // Callers that stopped waiting cost nothing.
            while self
                .pending
                .front()
                .is_some_and(|request| request.is_cancelled())
            {
                self.pending.pop_front();
            }

            if self.pending.is_empty() || self.active >= self.max_concurrent {
                return;
            }

            if let Some(index) = self.connections.iter().position(|c| !c.busy) {
                let request = self
                    .pending
                    .pop_front()
                    .expect("non-empty queue checked above");
                match self.connections[index].assign.try_send(request) {
                    Ok(()) => {
                        self.connections[index].busy = true;
                        self.active += 1;
                    }
                    Err(error) => {
                        // The slot's task is gone or wedged; put the
                        // request back and drop the slot.
                        self.pending.push_front(error.into_inner());
                        self.connections.remove(index);
                    }
                }
            } else if !self.connecting && self.connections.len() < self.max_concurrent {
                self.connecting = true;
                let host = self.host.clone();
                let config = self.config.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = open_stream(&host, &config).await;
                    let _ = events.send(Event::ConnectFinished(result));
                });
                return;
            } else {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config() -> NetConfig {
        NetConfig {
            user_agent: "GeoFetch/test".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    fn local_host(port: u16) -> Host {
        Host {
            tls: false,
            hostname: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Serve every connection with a fixed response after an optional
    /// delay, tracking the number of simultaneously open exchanges.
    async fn spawn_origin(
        delay: Duration,
        peak: Arc<AtomicUsize>,
    ) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let in_flight = Arc::new(AtomicUsize::new(0));

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else {
                            break;
                        };
                        if n == 0 {
                            break;
                        }

                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);

                        let response =
                            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                        if socket.write_all(response).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn test_submit_and_receive() {
        let peak = Arc::new(AtomicUsize::new(0));
        let port = spawn_origin(Duration::ZERO, peak).await;
        let manager = HostManager::spawn(local_host(port), config(), 4);

        let response = manager
            .submit("/a".to_string(), Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"ok");
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        let peak = Arc::new(AtomicUsize::new(0));
        let port = spawn_origin(Duration::from_millis(50), peak.clone()).await;
        let manager = HostManager::spawn(local_host(port), config(), 2);

        let receivers: Vec<_> = (0..8)
            .map(|i| manager.submit(format!("/tile/{i}"), Vec::new()))
            .collect();
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "peak {} exceeded cap 2",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_raising_cap_takes_effect() {
        let peak = Arc::new(AtomicUsize::new(0));
        let port = spawn_origin(Duration::from_millis(50), peak.clone()).await;
        let manager = HostManager::spawn(local_host(port), config(), 1);
        manager.set_max_concurrent(4);

        let receivers: Vec<_> = (0..8)
            .map(|i| manager.submit(format!("/tile/{i}"), Vec::new()))
            .collect();
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_connect_failure_fails_all_queued() {
        // Bind then drop to find a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = HostManager::spawn(local_host(port), config(), 2);
        let rx_a = manager.submit("/a".to_string(), Vec::new());
        let rx_b = manager.submit("/b".to_string(), Vec::new());

        assert!(rx_a.await.unwrap().is_err());
        assert!(rx_b.await.unwrap().is_err());

        // The manager stays usable for later submissions.
        let rx_c = manager.submit("/c".to_string(), Vec::new());
        assert!(rx_c.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_request_never_dispatched() {
        let peak = Arc::new(AtomicUsize::new(0));
        let port = spawn_origin(Duration::from_millis(20), peak).await;
        let manager = HostManager::spawn(local_host(port), config(), 1);

        let rx_live = manager.submit("/live".to_string(), Vec::new());
        let rx_dead = manager.submit("/dead".to_string(), Vec::new());
        drop(rx_dead);
        let rx_tail = manager.submit("/tail".to_string(), Vec::new());

        assert!(rx_live.await.unwrap().is_ok());
        assert!(rx_tail.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_keep_alive_reuses_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let connections_seen = connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                connections_seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else { break };
                        if n == 0 {
                            break;
                        }
                        let response =
                            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                        if socket.write_all(response).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let manager = HostManager::spawn(local_host(port), config(), 1);
        for i in 0..3 {
            manager
                .submit(format!("/seq/{i}"), Vec::new())
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }
}
