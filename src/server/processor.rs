//! Dispatcher and I/O threads.
//!
//! The dispatcher moves each accepted connection to the inbound queue of
//! I/O thread `id mod N`. An I/O thread owns every connection it is handed
//! until it closes it, so connection state lives in a plain thread-local
//! map. Each thread runs two edge-triggered mio registries, one for read
//! interest and one for write interest, and never blocks: polls use a zero
//! timeout and the thread sleeps `loop_interval_ms` only after a turn that
//! found nothing to do.
//!
//! A connection has at most one task in the worker pool. The next parsed
//! request is submitted once the previous response has been flushed, which
//! keeps pipelined responses in request order.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use crossbeam::queue::SegQueue;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::protocol::{ConnectionReader, ConnectionWriter, ProtocolFactory, ProtocolProcessor, ReadError};
use crate::server::connection::Connection;
use crate::server::stats::EngineStats;
use crate::server::worker::{TaskError, TaskHandle, WorkerPool};

/// How long the dispatcher waits on the intake queue before rechecking
/// whether it should stop.
const DISPATCH_WAIT: Duration = Duration::from_millis(100);

type Response<P> = <<P as ProtocolFactory>::Processor as ProtocolProcessor>::Response;

/// The I/O thread index that owns connection `id`.
pub fn shard_index(id: u64, shards: usize) -> usize {
    (id % shards as u64) as usize
}

/// Runs the dispatcher, the I/O threads and the worker pool.
pub struct ConnectionProcessor {
    running: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    dispatcher: Option<JoinHandle<()>>,
    io_threads: Vec<JoinHandle<()>>,
}

impl ConnectionProcessor {
    pub fn start<P: ProtocolFactory>(
        config: Arc<Config>,
        protocol: Arc<P>,
        intake: Receiver<Connection>,
        stats: Arc<EngineStats>,
    ) -> anyhow::Result<Self> {
        let name = config.server.name_without_version().to_string();
        let processor = Arc::new(protocol.new_processor(&config)?);
        let pool = Arc::new(WorkerPool::new(&name, &config.engine)?);
        let running = Arc::new(AtomicBool::new(true));

        let shared = Arc::new(Shared {
            protocol,
            processor,
            pool: Arc::clone(&pool),
            stats,
            config: Arc::clone(&config),
        });

        let mut engine = Self {
            running: Arc::clone(&running),
            pool,
            dispatcher: None,
            io_threads: Vec::with_capacity(config.engine.io_threads),
        };

        let mut inboxes = Vec::with_capacity(config.engine.io_threads);
        for index in 0..config.engine.io_threads {
            let inbound = Arc::new(SegQueue::new());
            inboxes.push(Arc::clone(&inbound));

            let io = IoThread::new(index, Arc::clone(&shared), inbound)?;
            let flag = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name(format!("{name}-IO-{index}"))
                .spawn(move || io.run(&flag));
            match handle {
                Ok(handle) => engine.io_threads.push(handle),
                Err(e) => {
                    engine.stop();
                    return Err(e.into());
                }
            }
        }

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("{name}-ConnectionDispatcher"))
            .spawn(move || dispatch_loop(intake, inboxes, &flag));
        match handle {
            Ok(handle) => engine.dispatcher = Some(handle),
            Err(e) => {
                engine.stop();
                return Err(e.into());
            }
        }

        info!(io_threads = config.engine.io_threads, "Connection processor started");
        Ok(engine)
    }

    /// Stops the engine threads and abandons all worker tasks. Open
    /// connections are closed by their I/O threads on the way out.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.pool.shutdown();

        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("Dispatcher thread panicked");
            }
        }
        for handle in self.io_threads.drain(..) {
            if handle.join().is_err() {
                warn!("I/O thread panicked");
            }
        }
        info!("Connection processor stopped");
    }
}

impl Drop for ConnectionProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(
    intake: Receiver<Connection>,
    inboxes: Vec<Arc<SegQueue<Connection>>>,
    running: &AtomicBool,
) {
    while running.load(Ordering::Acquire) {
        match intake.recv_timeout(DISPATCH_WAIT) {
            Ok(conn) => {
                let shard = shard_index(conn.id(), inboxes.len());
                debug!(conn = conn.id(), shard, "Connection dispatched");
                inboxes[shard].push(conn);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// State every I/O thread of one engine reads.
struct Shared<P: ProtocolFactory> {
    protocol: Arc<P>,
    processor: Arc<P::Processor>,
    pool: Arc<WorkerPool>,
    stats: Arc<EngineStats>,
    config: Arc<Config>,
}

struct ConnState<P: ProtocolFactory> {
    conn: Connection,
    reader: P::Reader,
    writer: P::Writer,
    write_registered: bool,
    in_flight: bool,
    backlogged: bool,
}

struct InFlight<P: ProtocolFactory> {
    id: u64,
    handle: TaskHandle<anyhow::Result<Response<P>>>,
}

#[derive(Debug, PartialEq, Eq)]
enum Turn {
    Idle,
    Busy,
    Stop,
}

struct IoThread<P: ProtocolFactory> {
    index: usize,
    shared: Arc<Shared<P>>,
    inbound: Arc<SegQueue<Connection>>,
    read_poll: Poll,
    write_poll: Poll,
    events: Events,
    connections: HashMap<u64, ConnState<P>>,
    in_flight: Vec<InFlight<P>>,
    outbound: VecDeque<u64>,
    /// Connections holding a parsed request back while the pool is full.
    backlog: VecDeque<u64>,
}

impl<P: ProtocolFactory> IoThread<P> {
    fn new(index: usize, shared: Arc<Shared<P>>, inbound: Arc<SegQueue<Connection>>) -> io::Result<Self> {
        Ok(Self {
            index,
            read_poll: Poll::new()?,
            write_poll: Poll::new()?,
            events: Events::with_capacity(256),
            shared,
            inbound,
            connections: HashMap::new(),
            in_flight: Vec::new(),
            outbound: VecDeque::new(),
            backlog: VecDeque::new(),
        })
    }

    fn run(mut self, running: &AtomicBool) {
        debug!(shard = self.index, "I/O thread started");
        let interval = self.shared.config.engine.loop_interval();

        while running.load(Ordering::Acquire) {
            match self.turn() {
                Turn::Busy => {}
                Turn::Idle => thread::sleep(interval),
                Turn::Stop => break,
            }
        }

        self.close_all();
        debug!(shard = self.index, "I/O thread stopped");
    }

    /// One pass over the connection lifecycle.
    fn turn(&mut self) -> Turn {
        let mut busy = self.register_inbound();
        busy |= self.read_ready();
        busy |= self.drain_backlog();

        match self.reap_completed() {
            Turn::Stop => return Turn::Stop,
            Turn::Busy => busy = true,
            Turn::Idle => {}
        }

        busy |= self.register_outbound();
        busy |= self.write_ready();

        if busy { Turn::Busy } else { Turn::Idle }
    }

    fn register_inbound(&mut self) -> bool {
        let mut busy = false;

        for _ in 0..self.shared.config.engine.poll_batch {
            let Some(conn) = self.inbound.pop() else {
                break;
            };
            busy = true;

            let id = conn.id();
            let fd = conn.as_raw_fd();
            if let Err(e) = self
                .read_poll
                .registry()
                .register(&mut SourceFd(&fd), token(id), Interest::READABLE)
            {
                error!(conn = id, error = %e, "Failed to register read interest");
                if let Err(e) = conn.close() {
                    debug!(conn = id, error = %e, "Socket shutdown failed");
                }
                continue;
            }

            let state = ConnState {
                conn,
                reader: self.shared.protocol.new_reader(&self.shared.config),
                writer: self.shared.protocol.new_writer(&self.shared.config),
                write_registered: false,
                in_flight: false,
                backlogged: false,
            };
            self.connections.insert(id, state);
            self.shared.stats.connection_opened();
            debug!(conn = id, shard = self.index, "Connection registered");
        }

        busy
    }

    fn read_ready(&mut self) -> bool {
        let ready = match poll_now(&mut self.read_poll, &mut self.events) {
            Ok(ready) => ready,
            Err(e) => {
                error!(shard = self.index, error = %e, "Read poll failed");
                return false;
            }
        };

        for &id in &ready {
            let Some(state) = self.connections.get_mut(&id) else {
                continue;
            };

            match state.reader.read(&mut state.conn) {
                Ok(n) => {
                    if n > 0 {
                        debug!(conn = id, bytes = n, "Bytes read");
                    }
                    self.submit_next(id);
                }
                Err(ReadError::EndOfStream) => {
                    info!(conn = id, "Peer closed connection");
                    self.close(id);
                }
                Err(ReadError::Malformed(reason)) => {
                    warn!(conn = id, reason = %reason, "Malformed input");
                    self.close(id);
                }
                Err(ReadError::Io(e)) => {
                    warn!(conn = id, error = %e, "Read failed");
                    self.close(id);
                }
            }
        }

        !ready.is_empty()
    }

    /// Hands the oldest parsed message of `id` to the worker pool, if the
    /// connection is free to take its next request.
    fn submit_next(&mut self, id: u64) -> bool {
        let Some(state) = self.connections.get_mut(&id) else {
            return false;
        };
        if state.in_flight || state.writer.has_pending() || !state.reader.has_next() {
            return false;
        }

        if !self.shared.pool.has_capacity() {
            if !state.backlogged {
                state.backlogged = true;
                self.backlog.push_back(id);
                debug!(conn = id, pending = self.shared.pool.pending(), "Submission deferred");
            }
            return false;
        }

        let Some(message) = state.reader.next() else {
            return false;
        };
        state.in_flight = true;

        let processor = Arc::clone(&self.shared.processor);
        let handle = self.shared.pool.submit(move || processor.process(message));
        self.in_flight.push(InFlight { id, handle });
        debug!(conn = id, "Task submitted");
        true
    }

    fn drain_backlog(&mut self) -> bool {
        let mut busy = false;

        while self.shared.pool.has_capacity() {
            let Some(id) = self.backlog.pop_front() else {
                break;
            };
            if let Some(state) = self.connections.get_mut(&id) {
                state.backlogged = false;
            }
            busy |= self.submit_next(id);
        }

        busy
    }

    fn reap_completed(&mut self) -> Turn {
        let mut busy = false;
        let mut i = 0;

        while i < self.in_flight.len() {
            let Some(outcome) = self.in_flight[i].handle.try_join() else {
                i += 1;
                continue;
            };
            let id = self.in_flight.swap_remove(i).id;
            busy = true;

            let failure = match outcome {
                Ok(Ok(response)) => {
                    self.shared.stats.task_completed();
                    match self.connections.get_mut(&id) {
                        Some(state) => {
                            state.in_flight = false;
                            state.writer.add(response);
                            self.outbound.push_back(id);
                            debug!(conn = id, "Task completed");
                        }
                        None => debug!(conn = id, "Connection closed before its response was ready"),
                    }
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(TaskError::Panicked(msg)) => format!("task panicked: {msg}"),
                Err(TaskError::Cancelled) => {
                    warn!(shard = self.index, "Worker pool shut down, I/O thread stopping");
                    return Turn::Stop;
                }
            };

            self.shared.stats.task_failed();
            warn!(conn = id, error = %failure, "Processing failed, no response sent");
            if let Some(state) = self.connections.get_mut(&id) {
                state.in_flight = false;
            }
            self.submit_next(id);
        }

        if busy { Turn::Busy } else { Turn::Idle }
    }

    fn register_outbound(&mut self) -> bool {
        let mut busy = false;

        for _ in 0..self.shared.config.engine.poll_batch {
            let Some(id) = self.outbound.pop_front() else {
                break;
            };
            busy = true;

            let Some(state) = self.connections.get_mut(&id) else {
                continue;
            };
            let fd = state.conn.as_raw_fd();
            let registry = self.write_poll.registry();
            let registered = if state.write_registered {
                registry.reregister(&mut SourceFd(&fd), token(id), Interest::WRITABLE)
            } else {
                registry.register(&mut SourceFd(&fd), token(id), Interest::WRITABLE)
            };

            match registered {
                Ok(()) => state.write_registered = true,
                Err(e) => {
                    error!(conn = id, error = %e, "Failed to register write interest");
                    self.close(id);
                }
            }
        }

        busy
    }

    fn write_ready(&mut self) -> bool {
        let ready = match poll_now(&mut self.write_poll, &mut self.events) {
            Ok(ready) => ready,
            Err(e) => {
                error!(shard = self.index, error = %e, "Write poll failed");
                return false;
            }
        };

        for &id in &ready {
            let Some(state) = self.connections.get_mut(&id) else {
                continue;
            };

            match state.writer.write(&mut state.conn) {
                Ok(n) if state.writer.has_pending() => {
                    // Blocked mid-response; the next edge resumes it.
                    debug!(conn = id, bytes = n, "Peer not ready for more bytes");
                }
                Ok(n) => {
                    let fd = state.conn.as_raw_fd();
                    if let Err(e) = self.write_poll.registry().deregister(&mut SourceFd(&fd)) {
                        warn!(conn = id, error = %e, "Failed to drop write interest");
                    }
                    state.write_registered = false;
                    debug!(conn = id, bytes = n, "Write interest dropped");
                    self.submit_next(id);
                }
                Err(e) => {
                    error!(conn = id, error = %e, "Write failed");
                    self.close(id);
                }
            }
        }

        !ready.is_empty()
    }

    fn close(&mut self, id: u64) {
        let Some(state) = self.connections.remove(&id) else {
            return;
        };

        let fd = state.conn.as_raw_fd();
        let peer = state.conn.peer_addr();
        if let Err(e) = self.read_poll.registry().deregister(&mut SourceFd(&fd)) {
            debug!(conn = id, error = %e, "Failed to drop read interest");
        }
        if state.write_registered {
            if let Err(e) = self.write_poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(conn = id, error = %e, "Failed to drop write interest");
            }
        }
        if let Err(e) = state.conn.close() {
            debug!(conn = id, error = %e, "Socket shutdown failed");
        }

        self.shared.stats.connection_closed();
        debug!(conn = id, peer = ?peer, "Connection closed");
    }

    fn close_all(&mut self) {
        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
        while let Some(conn) = self.inbound.pop() {
            let id = conn.id();
            if let Err(e) = conn.close() {
                debug!(conn = id, error = %e, "Socket shutdown failed");
            }
        }
        self.in_flight.clear();
        self.outbound.clear();
        self.backlog.clear();
    }
}

fn token(id: u64) -> Token {
    Token(id as usize)
}

/// Non-blocking poll; returns the connection ids that are ready.
fn poll_now(poll: &mut Poll, events: &mut Events) -> io::Result<Vec<u64>> {
    match poll.poll(events, Some(Duration::ZERO)) {
        Ok(()) => Ok(events.iter().map(|event| event.token().0 as u64).collect()),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ServerConfig};
    use crate::http::HttpProtocol;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    #[test]
    fn same_residue_same_shard() {
        assert_eq!(shard_index(3, 4), 3);
        assert_eq!(shard_index(7, 4), 3);
        assert_eq!(shard_index(8, 4), 0);
        assert_eq!(shard_index(5, 1), 0);

        for id in 1..200u64 {
            assert_eq!(shard_index(id, 3), shard_index(id + 3, 3));
        }
    }

    fn io_thread(root: &std::path::Path) -> (IoThread<HttpProtocol>, Arc<EngineStats>) {
        let config = Arc::new(Config {
            server: ServerConfig {
                root_directory: root.to_path_buf(),
                ..ServerConfig::default()
            },
            engine: EngineConfig {
                io_threads: 1,
                max_worker_threads: 2,
                ..EngineConfig::default()
            },
        });
        let protocol = Arc::new(HttpProtocol);
        let stats = Arc::new(EngineStats::new());
        let shared = Arc::new(Shared {
            processor: Arc::new(protocol.new_processor(&config).unwrap()),
            pool: Arc::new(WorkerPool::new("test", &config.engine).unwrap()),
            stats: Arc::clone(&stats),
            protocol,
            config,
        });

        let io = IoThread::new(0, shared, Arc::new(SegQueue::new())).unwrap();
        (io, stats)
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn turn_until(io: &mut IoThread<HttpProtocol>, mut done: impl FnMut(&IoThread<HttpProtocol>) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&*io) {
            assert_ne!(io.turn(), Turn::Stop);
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn write_interest_dropped_once_response_flushed() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("index.html"), "hello").unwrap();
        let (mut io, stats) = io_thread(root.path());

        let (mut client, server) = socket_pair();
        io.inbound.push(Connection::new(7, server).unwrap());
        client.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();

        turn_until(&mut io, |io| stats.tasks_completed() == 1 && io.outbound.is_empty());
        turn_until(&mut io, |io| !io.connections[&7].write_registered);

        let state = &io.connections[&7];
        assert!(!state.in_flight);
        assert!(!state.writer.has_pending());

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));

        // Nothing left to write: later turns stay off the write registry.
        for _ in 0..10 {
            io.turn();
        }
        assert!(!io.connections[&7].write_registered);
        assert_eq!(stats.open_connections(), 1);
    }

    #[test]
    fn blocked_write_waits_for_peer_without_spinning() {
        const SIZE: usize = 32 * 1024 * 1024;

        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("big.bin"), vec![b'x'; SIZE]).unwrap();
        let (mut io, stats) = io_thread(root.path());

        let (mut client, server) = socket_pair();
        io.inbound.push(Connection::new(5, server).unwrap());
        client.write_all(b"GET /big.bin HTTP/1.1\r\n\r\n").unwrap();

        // The client reads nothing yet, so the socket buffers fill up.
        turn_until(&mut io, |io| stats.tasks_completed() == 1 && io.outbound.is_empty());
        let settle = |io: &mut IoThread<HttpProtocol>| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while io.turn() != Turn::Idle {
                assert!(Instant::now() < deadline, "blocked writer kept the thread busy");
            }
        };
        settle(&mut io);
        thread::sleep(Duration::from_millis(100));
        settle(&mut io);

        for _ in 0..20 {
            assert_eq!(io.turn(), Turn::Idle);
            thread::sleep(Duration::from_millis(1));
        }
        let state = &io.connections[&5];
        assert!(state.writer.has_pending());
        assert!(state.write_registered);
        assert_eq!(stats.open_connections(), 1);

        let reader = thread::spawn(move || {
            client.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
            let mut received = Vec::new();
            let mut buf = vec![0u8; 64 * 1024];
            let mut head_end = None;
            while head_end.is_none_or(|end| received.len() < end + SIZE) {
                let n = client.read(&mut buf).unwrap();
                assert!(n > 0, "connection closed early");
                received.extend_from_slice(&buf[..n]);
                if head_end.is_none() {
                    head_end = received
                        .windows(4)
                        .position(|w| w == b"\r\n\r\n")
                        .map(|pos| pos + 4);
                }
            }
            let end = head_end.unwrap();
            (received[..end - 4].to_vec(), received.len() - end)
        });

        turn_until(&mut io, |io| {
            let state = &io.connections[&5];
            !state.write_registered && !state.writer.has_pending()
        });
        let (head, body_len) = reader.join().unwrap();

        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains(&format!("Content-Length: {SIZE}")));
        assert_eq!(body_len, SIZE);
        assert_eq!(stats.open_connections(), 1);
    }

    #[test]
    fn end_of_stream_removes_connection() {
        let root = tempfile::tempdir().unwrap();
        let (mut io, stats) = io_thread(root.path());

        let (client, server) = socket_pair();
        io.inbound.push(Connection::new(3, server).unwrap());
        turn_until(&mut io, |io| io.connections.contains_key(&3));
        assert_eq!(stats.open_connections(), 1);

        drop(client);
        turn_until(&mut io, |io| io.connections.is_empty());
        assert_eq!(stats.open_connections(), 0);
    }

    #[test]
    fn pipelined_requests_wait_for_previous_response() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), "a").unwrap();
        std::fs::write(root.path().join("b.txt"), "b").unwrap();
        let (mut io, stats) = io_thread(root.path());

        let (mut client, server) = socket_pair();
        io.inbound.push(Connection::new(1, server).unwrap());
        client
            .write_all(b"GET /a.txt HTTP/1.1\r\n\r\nGET /b.txt HTTP/1.1\r\n\r\n")
            .unwrap();

        turn_until(&mut io, |io| {
            assert!(io.in_flight.len() <= 1);
            stats.tasks_completed() == 2
        });
        turn_until(&mut io, |io| {
            let state = &io.connections[&1];
            !state.write_registered && !state.writer.has_pending()
        });

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&received).ends_with("\r\n\r\nb") {
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&received);
        let first = text.find("\r\n\r\na").unwrap();
        let second = text.find("\r\n\r\nb").unwrap();
        assert!(first < second);
    }
}
