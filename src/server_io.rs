//! The framed, id-correlated connection owned by either a master or a
//! worker (§4.5). One supervising task owns the socket: it reads
//! lines, classifies each as a command or a result, and either
//! buffers the command for [`ServerIo::get_command`] or wakes the
//! waiter registered for that result's id.
//!
//! Grounded on the teacher's `wire::framed`/`do_client_loop` shape
//! (`Framed` + a dedicated per-connection task selecting on a
//! `CancellationToken`), generalized from beanstalkd's single command
//! stream to two-way command/result multiplexing with request ids.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::line::LineCodec;
use crate::codec::value::ArgumentMap;
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Command, InboundLine, ResultLine};
use crate::session::Session;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

type PendingResult = Result<ResultLine>;

enum PendingSlot {
    /// A caller is blocked in `wait_result`, holding the other half.
    Waiting(oneshot::Sender<PendingResult>),
    /// Results arrived before any caller asked for them (the
    /// issue-then-wait race called out in §4.5). Held until a waiter
    /// appears or the connection closes.
    Buffered(VecDeque<ResultLine>),
}

struct Shared {
    pending: std::sync::Mutex<HashMap<u64, PendingSlot>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn fail_all_waiters(&self, err: &Error) {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        for (_, slot) in pending.drain() {
            if let PendingSlot::Waiting(tx) = slot {
                let _ = tx.send(Err(Error::protocol(err.kind(), err.to_string())));
            }
        }
    }

    fn deliver_result(&self, result: ResultLine) {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        match pending.remove(&result.id) {
            Some(PendingSlot::Waiting(tx)) => {
                if result.completed {
                    let _ = tx.send(Ok(result));
                } else {
                    // No mechanism yet to deliver interim progress
                    // through a one-shot waiter; re-park it.
                    pending.insert(result.id, PendingSlot::Waiting(tx));
                }
            },
            Some(PendingSlot::Buffered(mut queue)) => {
                let id = result.id;
                queue.push_back(result);
                pending.insert(id, PendingSlot::Buffered(queue));
            },
            None => {
                let mut queue = VecDeque::new();
                let id = result.id;
                queue.push_back(result);
                pending.insert(id, PendingSlot::Buffered(queue));
            },
        }
    }
}

/// One full-duplex connection between a master and a worker.
///
/// Callers share one `ServerIo` across tasks by wrapping it in an
/// `Arc` (as `connector::Connector` and `worker::run` both do) rather
/// than cloning it; the connection closes when the owning `ServerIo`
/// drops and the reader task observes EOF.
pub struct ServerIo {
    writer: Arc<Mutex<WriterHalf>>,
    shared: Arc<Shared>,
    commands_rx: Arc<Mutex<mpsc::UnboundedReceiver<Command>>>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    pub session: Session,
}

type WriterHalf = futures::stream::SplitSink<Framed<Box<dyn AsyncStream>, LineCodec>, String>;

/// Object-safe alias for the duplex transports a `ServerIo` can own.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

impl ServerIo {
    /// Binds to `transport` as the accepting side: generates the
    /// session and sends the `SESSION` greeting before anything else
    /// is read or written.
    pub async fn accept<T>(transport: T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session::accept();
        let framed = Framed::new(Box::new(transport) as Box<dyn AsyncStream>, LineCodec);
        let (mut writer, reader_stream) = framed.split();
        writer.send(session.render_greeting()).await?;
        Ok(Self::spawn(writer, reader_stream, session))
    }

    /// Binds to `transport` as the initiating side: consumes exactly
    /// one `SESSION` line before spawning the ongoing reader loop.
    pub async fn connect<T>(transport: T) -> Result<(Self, Option<rsa::RsaPublicKey>)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(Box::new(transport) as Box<dyn AsyncStream>, LineCodec);
        let (writer, mut reader_stream) = framed.split();

        let greeting = reader_stream
            .next()
            .await
            .ok_or(Error::Disconnected)??;
        let (session_id, peer_key) = Session::parse_greeting(&greeting)?;
        let session = Session::for_initiator(session_id);

        Ok((Self::spawn(writer, reader_stream, session), peer_key))
    }

    fn spawn(
        writer: futures::stream::SplitSink<Framed<Box<dyn AsyncStream>, LineCodec>, String>,
        mut reader_stream: futures::stream::SplitStream<Framed<Box<dyn AsyncStream>, LineCodec>>,
        session: Session,
    ) -> Self {
        let shared = Arc::new(Shared {
            pending: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let reader_shared = shared.clone();
        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    line = reader_stream.next() => line,
                    _ = reader_cancel.cancelled() => break,
                };

                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(error)) => {
                        warn!(%error, "fatal framing error, tearing down connection");
                        break;
                    },
                    None => {
                        debug!("peer closed connection");
                        break;
                    },
                };

                match crate::protocol::parse_line(&line) {
                    Ok(InboundLine::Command(cmd)) => {
                        if commands_tx.send(cmd).is_err() {
                            break;
                        }
                    },
                    Ok(InboundLine::Result(result)) => reader_shared.deliver_result(result),
                    Err(error) => {
                        trace!(%error, %line, "dropping malformed line");
                    },
                }
            }

            reader_shared.closed.store(true, Ordering::SeqCst);
            reader_shared.fail_all_waiters(&Error::Disconnected);
        });

        Self {
            writer: Arc::new(Mutex::new(writer)),
            shared,
            commands_rx: Arc::new(Mutex::new(commands_rx)),
            cancel,
            reader: Some(reader),
            session,
        }
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Consumes one buffered inbound command, if any is ready. Never
    /// blocks; results are routed internally and never observed here.
    pub async fn get_command(&self) -> Option<Command> {
        self.commands_rx.lock().await.recv().await
    }

    /// Assigns a monotonic id, writes the command line, and returns
    /// immediately without waiting for a result.
    pub async fn send_command(&self, name: &str, args: ArgumentMap) -> Result<u64> {
        self.check_open()?;
        let id = self.next_id();
        let command = Command { id, name: name.to_string(), args };
        self.writer.lock().await.send(command.render()).await?;
        Ok(id)
    }

    /// `send_command` followed by a bounded wait for the matching
    /// completed result.
    pub async fn execute_command(
        &self,
        name: &str,
        args: ArgumentMap,
        timeout: Duration,
    ) -> Result<ResultLine> {
        let id = self.send_command(name, args).await?;
        self.wait_result(id, timeout).await
    }

    /// Emits a result line correlated with a previously received
    /// command id.
    pub async fn send_result(
        &self,
        id: u64,
        completed: bool,
        error: ErrorKind,
        payload: impl Into<String>,
    ) -> Result<()> {
        self.check_open()?;
        let result = ResultLine { id, completed, error, payload: payload.into() };
        self.writer.lock().await.send(result.render()).await?;
        Ok(())
    }

    /// Blocks until the completed result for `id` arrives, the
    /// connection closes, or `timeout` elapses.
    pub async fn wait_result(&self, id: u64, timeout: Duration) -> Result<ResultLine> {
        self.check_open()?;

        let rx = {
            let mut pending = self.shared.pending.lock().expect("pending mutex poisoned");
            match pending.remove(&id) {
                Some(PendingSlot::Buffered(mut queue)) => {
                    if let Some(pos) = queue.iter().position(|r| r.completed) {
                        let result = queue.remove(pos).unwrap();
                        if !queue.is_empty() {
                            pending.insert(id, PendingSlot::Buffered(queue));
                        }
                        return Ok(result);
                    }
                    let (tx, rx) = oneshot::channel();
                    pending.insert(id, PendingSlot::Waiting(tx));
                    rx
                },
                Some(PendingSlot::Waiting(_)) => {
                    return Err(Error::protocol(
                        ErrorKind::InvalidResponse,
                        format!("id {id} already has a waiter"),
                    ));
                },
                None => {
                    let (tx, rx) = oneshot::channel();
                    pending.insert(id, PendingSlot::Waiting(tx));
                    rx
                },
            }
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.shared.pending.lock().expect("pending mutex poisoned").remove(&id);
                Err(Error::Timeout)
            },
        }
    }

    /// The cancellation primitive: stops the reader loop and wakes
    /// every outstanding waiter with a disconnected error.
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.fail_all_waiters(&Error::Disconnected);
    }
}

impl Drop for ServerIo {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn connected_pair() -> (ServerIo, ServerIo) {
        let (client_io, worker_io) = duplex(64 * 1024);
        let worker = tokio::spawn(ServerIo::accept(worker_io));
        let (client, _peer_key) = ServerIo::connect(client_io).await.unwrap();
        let worker = worker.await.unwrap().unwrap();
        (client, worker)
    }

    #[tokio::test]
    async fn command_and_result_round_trip() {
        let (client, worker) = connected_pair().await;

        let mut args = ArgumentMap::new();
        args.set("jobUUID", "u1");
        let id = client.send_command("JOB_STATUS", args).await.unwrap();

        let cmd = worker.get_command().await.unwrap();
        assert_eq!(cmd.id, id);
        assert_eq!(cmd.name, "JOB_STATUS");

        worker
            .send_result(cmd.id, true, ErrorKind::None, "state=running")
            .await
            .unwrap();

        let result = client.wait_result(id, Duration::from_secs(1)).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.payload, "state=running");
    }

    #[tokio::test]
    async fn two_in_flight_commands_correlate_independently() {
        let (client, worker) = connected_pair().await;

        let id1 = client
            .send_command("JOB_NEW", ArgumentMap::new())
            .await
            .unwrap();
        let id2 = client
            .send_command("JOB_STATUS", ArgumentMap::new())
            .await
            .unwrap();
        assert_ne!(id1, id2);

        let cmd2 = worker.get_command().await.unwrap();
        let cmd1 = worker.get_command().await.unwrap();

        worker.send_result(cmd2.id, true, ErrorKind::None, "state=running").await.unwrap();
        worker.send_result(cmd1.id, true, ErrorKind::None, "").await.unwrap();

        let result2 = client.wait_result(id2, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result2.payload, "state=running");
        let result1 = client.wait_result(id1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result1.payload, "");
    }

    #[tokio::test]
    async fn result_arriving_before_wait_is_buffered() {
        let (client, worker) = connected_pair().await;

        let id = client
            .send_command("JOB_STATUS", ArgumentMap::new())
            .await
            .unwrap();
        let cmd = worker.get_command().await.unwrap();
        worker.send_result(cmd.id, true, ErrorKind::None, "ok").await.unwrap();

        // give the reader a chance to buffer the result before we ask for it
        tokio::task::yield_now().await;

        let result = client.wait_result(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.payload, "ok");
    }

    #[tokio::test]
    async fn close_wakes_outstanding_waiters_with_disconnected() {
        let (client, _worker) = connected_pair().await;

        let id = client
            .send_command("JOB_STATUS", ArgumentMap::new())
            .await
            .unwrap();

        let client_wait = tokio::spawn(async move {
            client.wait_result(id, Duration::from_secs(5)).await
        });

        tokio::task::yield_now().await;
        // dropping `_worker` closes its half of the duplex stream, which
        // the reader observes as EOF and tears the connection down.
        drop(_worker);

        let result = client_wait.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_result_times_out_without_a_matching_result() {
        let (client, _worker) = connected_pair().await;
        let id = client
            .send_command("JOB_STATUS", ArgumentMap::new())
            .await
            .unwrap();
        let err = client.wait_result(id, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
