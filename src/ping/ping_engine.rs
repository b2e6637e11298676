use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::select;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{ConfigError, LoopSide, MeshError};
use crate::host::node_id::NodeId;
use crate::host::stream::{Stream, StreamInfo};
use crate::host::transport_host::StreamHandler;
use crate::ping::ping_config::PingConfig;
use crate::ping::ping_message::{PingDecodeError, PingMessage, PingReader, ReadPing};
use crate::util::random::{Random, RngRandom};
use crate::util::shutdown::Shutdown;


/// Lifecycle of one of a stream's protocol loops. `Terminated` is final: loops are never
///  restarted.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LoopState {
    Idle,
    Running,
    Terminated,
}

#[derive(Debug)]
pub enum LoopOutcome {
    /// stopped because shutdown was signalled
    Cancelled,
    /// stopped because of an I/O error on the stream
    Failed(MeshError),
    /// the loop's task panicked or was aborted
    Aborted,
}
impl LoopOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoopOutcome::Cancelled)
    }
}

/// Gets notified of everything the ping loops do. Callbacks are made from the loops' tasks, so
///  they should return quickly.
pub trait PingObserver: Send + Sync + 'static {
    fn on_ping_sent(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage);
    fn on_ping_received(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage);
    fn on_loop_terminated(&self, local: &NodeId, stream: &StreamInfo, side: LoopSide, outcome: &LoopOutcome);
}

/// Reports ping traffic through the log - this is the 'display' side of the protocol
pub struct LoggingObserver {}
impl PingObserver for LoggingObserver {
    fn on_ping_sent(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage) {
        info!("{} sent ping to {}: {}", local, stream.peer_of(local), ping);
    }

    fn on_ping_received(&self, local: &NodeId, stream: &StreamInfo, ping: &PingMessage) {
        info!("{} received ping from {}: {}", local, stream.peer_of(local), ping);
    }

    fn on_loop_terminated(&self, local: &NodeId, stream: &StreamInfo, side: LoopSide, outcome: &LoopOutcome) {
        match outcome {
            LoopOutcome::Cancelled => debug!("{} stopped pinging on the {} of {:?}", local, side, stream),
            LoopOutcome::Failed(e) => warn!("{} stopped pinging {}: {}", local, stream.peer_of(local), e),
            LoopOutcome::Aborted => error!("{} ping loop on the {} of {:?} was aborted", local, side, stream),
        }
    }
}


/// Runs the ping protocol on established streams: for every stream, one task sends pings and
///  another task reads and reports the pings the peer sends. The two tasks and the tasks of other
///  streams are independent of each other - an I/O error terminates only the loop it occurs in.
pub struct PingEngine<R: Random + 'static = RngRandom> {
    config: Arc<PingConfig>,
    observer: Arc<dyn PingObserver>,
    shutdown: Shutdown,
    _random: PhantomData<fn() -> R>,
}

impl <R: Random + 'static> Clone for PingEngine<R> {
    fn clone(&self) -> Self {
        PingEngine {
            config: self.config.clone(),
            observer: self.observer.clone(),
            shutdown: self.shutdown.clone(),
            _random: PhantomData,
        }
    }
}

impl PingEngine<RngRandom> {
    pub fn new(config: Arc<PingConfig>, observer: Arc<dyn PingObserver>, shutdown: Shutdown) -> PingEngine<RngRandom> {
        Self::new_with_random(config, observer, shutdown)
    }
}

impl <R: Random + 'static> PingEngine<R> {
    pub fn new_with_random(config: Arc<PingConfig>, observer: Arc<dyn PingObserver>, shutdown: Shutdown) -> PingEngine<R> {
        PingEngine {
            config,
            observer,
            shutdown,
            _random: PhantomData,
        }
    }

    /// Spawns the sender and receiver loops for a stream. The loops run until an I/O error
    ///  occurs on the stream or shutdown is signalled.
    pub fn start(&self, stream: Stream) -> PingLoops {
        let info = stream.info().clone();
        let local = stream.local_peer().clone();
        let span = tracing::info_span!("ping", local = %local, remote = %stream.remote_peer());

        let (reader, writer) = tokio::io::split(stream);

        let sender = {
            let ctx = LoopContext::new(self, &local, &info, LoopSide::Sender);
            spawn_loop(ctx, |ctx| send_loop::<R>(writer, ctx), span.clone())
        };
        let receiver = {
            let ctx = LoopContext::new(self, &local, &info, LoopSide::Receiver);
            spawn_loop(ctx, |ctx| receive_loop(reader, ctx), span)
        };

        PingLoops {
            info,
            sender,
            receiver,
        }
    }
}


/// Handles to a stream's two protocol loops
pub struct PingLoops {
    info: StreamInfo,
    sender: LoopHandle,
    receiver: LoopHandle,
}

impl PingLoops {
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn sender_state(&self) -> LoopState {
        *self.sender.state.borrow()
    }

    pub fn receiver_state(&self) -> LoopState {
        *self.receiver.state.borrow()
    }

    /// waits for both loops to terminate, returning (sender outcome, receiver outcome)
    pub async fn join(self) -> (LoopOutcome, LoopOutcome) {
        let sender = self.sender.join().await;
        let receiver = self.receiver.join().await;
        (sender, receiver)
    }
}

struct LoopHandle {
    state: watch::Receiver<LoopState>,
    join_handle: JoinHandle<LoopOutcome>,
}

impl LoopHandle {
    async fn join(self) -> LoopOutcome {
        match self.join_handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("ping loop task failed: {}", e);
                LoopOutcome::Aborted
            }
        }
    }
}

/// Everything a single loop needs, owned by the loop's task
#[derive(Clone)]
struct LoopContext {
    local: NodeId,
    info: StreamInfo,
    side: LoopSide,
    config: Arc<PingConfig>,
    observer: Arc<dyn PingObserver>,
    shutdown: Shutdown,
}

impl LoopContext {
    fn new<R: Random + 'static>(engine: &PingEngine<R>, local: &NodeId, info: &StreamInfo, side: LoopSide) -> LoopContext {
        LoopContext {
            local: local.clone(),
            info: info.clone(),
            side,
            config: engine.config.clone(),
            observer: engine.observer.clone(),
            shutdown: engine.shutdown.clone(),
        }
    }

    fn remote(&self) -> &NodeId {
        self.info.peer_of(&self.local)
    }

    fn io_error(&self, source: std::io::Error) -> LoopOutcome {
        LoopOutcome::Failed(MeshError::ProtocolIo {
            side: self.side,
            stream: self.info.clone(),
            source,
        })
    }
}

fn spawn_loop<F, Fut>(ctx: LoopContext, body: F, span: tracing::Span) -> LoopHandle
where
    F: FnOnce(LoopContext) -> Fut,
    Fut: std::future::Future<Output = LoopOutcome> + Send + 'static,
{
    let (state_sender, state) = watch::channel(LoopState::Idle);
    let fut = body(ctx.clone());

    let join_handle = tokio::spawn(async move {
        state_sender.send_replace(LoopState::Running);
        let outcome = fut.await;
        ctx.observer.on_loop_terminated(&ctx.local, &ctx.info, ctx.side, &outcome);
        state_sender.send_replace(LoopState::Terminated);
        outcome
    }.instrument(span));

    LoopHandle {
        state,
        join_handle,
    }
}

async fn send_loop<R: Random>(mut writer: WriteHalf<Stream>, ctx: LoopContext) -> LoopOutcome {
    let mut shutdown = ctx.shutdown.clone();
    let sender_token = ctx.local.suffix(ctx.config.token_len).to_string();
    let receiver_token = ctx.remote().suffix(ctx.config.token_len).to_string();
    debug!("{} sending pings to {}", ctx.local, ctx.remote());

    // e.g. a token length of 0 produces pings no receiver could decode
    let template = match PingMessage::new(sender_token, receiver_token, 0) {
        Ok(template) => template,
        Err(PingDecodeError::InvalidToken(token)) => return LoopOutcome::Failed(ConfigError::InvalidPingToken(token).into()),
        Err(e) => return LoopOutcome::Failed(ConfigError::InvalidPingToken(e.to_string()).into()),
    };

    // the sequence number is owned exclusively by this loop
    let mut seq: u64 = 1;
    loop {
        let ping = template.with_seq(seq);
        let line = ping.encode();

        // NB: shutdown takes precedence, otherwise the peer closing its end during shutdown could
        //      be reported as a failure
        select! {
            biased;
            _ = shutdown.triggered() => return LoopOutcome::Cancelled,
            r = writer.write_all(line.as_bytes()) => {
                if let Err(e) = r {
                    return ctx.io_error(e);
                }
            }
        }
        ctx.observer.on_ping_sent(&ctx.local, &ctx.info, &ping);
        seq += 1;

        let delay = ctx.config.cadence.next_delay::<R>();
        select! {
            biased;
            _ = shutdown.triggered() => return LoopOutcome::Cancelled,
            _ = sleep(delay) => {}
        }
    }
}

async fn receive_loop(reader: ReadHalf<Stream>, ctx: LoopContext) -> LoopOutcome {
    let mut shutdown = ctx.shutdown.clone();
    let mut reader = PingReader::new(reader, ctx.config.max_line_len);
    debug!("{} reading pings from {}", ctx.local, ctx.remote());

    loop {
        select! {
            biased;
            _ = shutdown.triggered() => return LoopOutcome::Cancelled,
            r = reader.read_ping() => {
                match r {
                    Ok(ReadPing::Ping(ping)) => {
                        ctx.observer.on_ping_received(&ctx.local, &ctx.info, &ping);
                    }
                    Ok(ReadPing::Malformed { line, error }) => {
                        warn!("{} received a line from {} that is not a valid ping - skipping: {:?} ({})", ctx.local, ctx.remote(), line, error);
                    }
                    Err(e) => return ctx.io_error(e),
                }
            }
        }
    }
}


/// Starts the ping protocol for every inbound stream a host accepts. The loops it starts are kept
///  so the caller can wait for them on shutdown.
pub struct PingStreamHandler<R: Random + 'static = RngRandom> {
    engine: PingEngine<R>,
    inbound: Mutex<Vec<PingLoops>>,
}

impl <R: Random + 'static> PingStreamHandler<R> {
    pub fn new(engine: PingEngine<R>) -> PingStreamHandler<R> {
        PingStreamHandler {
            engine,
            inbound: Default::default(),
        }
    }

    /// the loops started for inbound streams so far, clearing the internal list
    pub async fn take_inbound_loops(&self) -> Vec<PingLoops> {
        std::mem::take(&mut *self.inbound.lock().await)
    }
}

#[async_trait]
impl <R: Random + 'static> StreamHandler for PingStreamHandler<R> {
    async fn handle_stream(&self, stream: Stream) {
        info!("{} accepted an incoming stream from {}", stream.local_peer(), stream.remote_peer());
        let loops = self.engine.start(stream);
        self.inbound.lock().await
            .push(loops);
    }
}


#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
    use tokio::runtime::Builder;

    use super::*;
    use crate::ping::ping_config::SendCadence;
    use crate::test_util::node::{test_node_id_from_number, test_stream_info};
    use crate::test_util::observer::RecordingObserver;
    use crate::util::random::{MockRandom, MOCK_RANDOM_MUTEX};
    use crate::util::shutdown::shutdown_signal;

    fn fixed_config(millis: u64) -> Arc<PingConfig> {
        Arc::new(PingConfig {
            cadence: SendCadence::Fixed(Duration::from_millis(millis)),
            ..PingConfig::new()
        })
    }

    /// a stream from node `from` to node `to`, returning the initiator's end and the raw
    ///  responder end
    fn stream_pair(from: u16, to: u16, id: u64) -> (Stream, DuplexStream) {
        let (a, b) = tokio::io::duplex(4096);
        let stream = Stream::new(test_stream_info(from, to, id), test_node_id_from_number(from), a);
        (stream, b)
    }

    /// reads pending on forever, writes fail
    struct BrokenIo {}
    impl AsyncRead for BrokenIo {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }
    impl AsyncWrite for BrokenIo {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected failure")))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_numbers() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let engine = PingEngine::new(fixed_config(100), observer.clone(), shutdown);

        let (stream, remote) = stream_pair(1, 2, 1);
        let loops = engine.start(stream);

        let mut reader = PingReader::new(remote, 1024);
        for seq in 1..=20 {
            let expected = PingMessage::new("e1", "e2", seq).unwrap();
            assert_eq!(reader.read_ping().await.unwrap(), ReadPing::Ping(expected));
        }

        assert_eq!(loops.sender_state(), LoopState::Running);
        assert_eq!(loops.receiver_state(), LoopState::Running);

        trigger.trigger();
        let (sender, receiver) = loops.join().await;
        assert!(sender.is_cancelled());
        assert!(receiver.is_cancelled());

        let sent = observer.sent_seqs(&test_stream_info(1, 2, 1));
        assert!(sent.len() >= 20);
        assert!(sent.iter().copied().eq(1..=sent.len() as u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_pings() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let engine = PingEngine::new(fixed_config(60_000), observer.clone(), shutdown);

        let (stream, mut remote) = stream_pair(1, 2, 1);
        let loops = engine.start(stream);

        remote.write_all(b"ping e2>e1#1\nnot a ping\nping e2>e1#2\n").await.unwrap();
        observer.wait_until(|o| o.received_seqs(&test_stream_info(1, 2, 1)).len() == 2).await;
        assert_eq!(observer.received_seqs(&test_stream_info(1, 2, 1)), vec![1, 2]);
        assert_eq!(loops.receiver_state(), LoopState::Running);

        trigger.trigger();
        loops.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_terminates_receiver_only() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let engine = PingEngine::new(fixed_config(1000), observer.clone(), shutdown);

        let (stream, mut remote) = stream_pair(1, 2, 1);
        let loops = engine.start(stream);

        // a partial line followed by the end of the stream's read direction
        remote.write_all(b"ping e2>e1").await.unwrap();
        remote.shutdown().await.unwrap();

        observer.wait_until(|o| !o.terminations().is_empty()).await;
        assert_eq!(loops.receiver_state(), LoopState::Terminated);
        assert_eq!(loops.sender_state(), LoopState::Running);
        assert_eq!(observer.terminations(), vec![(test_stream_info(1, 2, 1), LoopSide::Receiver, false)]);
        assert!(observer.received_seqs(&test_stream_info(1, 2, 1)).is_empty());

        trigger.trigger();
        let (sender, receiver) = loops.join().await;
        assert!(sender.is_cancelled());
        match receiver {
            LoopOutcome::Failed(MeshError::ProtocolIo { side, source, .. }) => {
                assert_eq!(side, LoopSide::Receiver);
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_isolation() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let engine = PingEngine::new(fixed_config(10), observer.clone(), shutdown);

        let (healthy_a, remote_a) = stream_pair(1, 2, 1);
        let broken = Stream::new(test_stream_info(1, 3, 2), test_node_id_from_number(1), BrokenIo {});
        let (healthy_b, remote_b) = stream_pair(1, 4, 3);

        let loops_a = engine.start(healthy_a);
        let loops_broken = engine.start(broken);
        let loops_b = engine.start(healthy_b);

        observer.wait_until(|o| !o.terminations().is_empty()).await;
        assert_eq!(loops_broken.sender_state(), LoopState::Terminated);
        assert_eq!(observer.terminations(), vec![(test_stream_info(1, 3, 2), LoopSide::Sender, false)]);

        // the other streams keep advancing their sequence numbers after the failure
        let mut reader_a = PingReader::new(remote_a, 1024);
        let mut reader_b = PingReader::new(remote_b, 1024);
        for seq in 1..=50 {
            assert_eq!(reader_a.read_ping().await.unwrap(), ReadPing::Ping(PingMessage::new("e1", "e2", seq).unwrap()));
            assert_eq!(reader_b.read_ping().await.unwrap(), ReadPing::Ping(PingMessage::new("e1", "e4", seq).unwrap()));
        }
        assert_eq!(loops_a.sender_state(), LoopState::Running);
        assert_eq!(loops_b.sender_state(), LoopState::Running);
        assert!(observer.sent_seqs(&test_stream_info(1, 3, 2)).is_empty());

        trigger.trigger();
        for loops in [loops_a, loops_broken, loops_b] {
            loops.join().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_token_fails_sender() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let config = Arc::new(PingConfig {
            cadence: SendCadence::Fixed(Duration::from_millis(10)),
            token_len: 0,
            ..PingConfig::new()
        });
        let engine = PingEngine::new(config, observer.clone(), shutdown);

        let (stream, mut remote) = stream_pair(1, 2, 1);
        let loops = engine.start(stream);

        observer.wait_until(|o| !o.terminations().is_empty()).await;
        assert_eq!(loops.sender_state(), LoopState::Terminated);
        assert_eq!(loops.receiver_state(), LoopState::Running);
        assert!(observer.sent_seqs(&test_stream_info(1, 2, 1)).is_empty());

        // nothing undecodable went out on the wire
        let mut buf = [0u8; 16];
        assert!(tokio::time::timeout(Duration::from_secs(1), remote.read(&mut buf)).await.is_err());

        trigger.trigger();
        let (sender, receiver) = loops.join().await;
        assert!(matches!(sender, LoopOutcome::Failed(MeshError::Config(ConfigError::InvalidPingToken(ref token))) if token.is_empty()));
        assert!(receiver.is_cancelled());
    }

    #[test]
    fn test_random_cadence() {
        let _lock = MOCK_RANDOM_MUTEX.lock(); // automock expectations for static methods are global, so we avoid races by locking

        let rt = Builder::new_current_thread().enable_all().start_paused(true).build().unwrap();
        rt.block_on(async move {
            let ctx = MockRandom::gen_u64_range_context();
            ctx.expect()
                .returning(|_| Duration::from_secs(5).as_nanos() as u64);

            let (trigger, shutdown) = shutdown_signal();
            let observer = Arc::new(RecordingObserver::new());
            let config = Arc::new(PingConfig {
                cadence: SendCadence::Random { max_interval: Duration::from_secs(10) },
                ..PingConfig::new()
            });
            let engine = PingEngine::<MockRandom>::new_with_random(config, observer.clone(), shutdown);

            let (stream, remote) = stream_pair(1, 2, 1);
            let start = tokio::time::Instant::now();
            let loops = engine.start(stream);

            let mut reader = PingReader::new(remote, 1024);
            for _ in 0..3 {
                reader.read_ping().await.unwrap();
            }
            assert_eq!(start.elapsed(), Duration::from_secs(10));

            trigger.trigger();
            loops.join().await;
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_handler_starts_loops() {
        let (trigger, shutdown) = shutdown_signal();
        let observer = Arc::new(RecordingObserver::new());
        let handler = PingStreamHandler::new(PingEngine::new(fixed_config(1000), observer.clone(), shutdown));

        // the handler sees the responder's end of the stream
        let (a, b) = tokio::io::duplex(4096);
        handler.handle_stream(Stream::new(test_stream_info(1, 2, 1), test_node_id_from_number(2), b)).await;

        let mut reader = PingReader::new(a, 1024);
        assert_eq!(reader.read_ping().await.unwrap(), ReadPing::Ping(PingMessage::new("e2", "e1", 1).unwrap()));

        let inbound = handler.take_inbound_loops().await;
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].info(), &test_stream_info(1, 2, 1));
        assert!(handler.take_inbound_loops().await.is_empty());

        trigger.trigger();
        for loops in inbound {
            loops.join().await;
        }
    }
}
