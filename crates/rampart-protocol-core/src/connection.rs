use crate::codec::{read_varint, write_varint, CodecError};
use crate::frame::{FrameDecoder, FrameEncoder};
use crate::packets::{CodecContext, Packet, PacketContext, PacketKind};
use crate::registry::Registries;
use crate::state::{Direction, State};
use crate::version::Protocol;
use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("connection closed")]
    Closed,
    #[error("write timed out")]
    Timeout,
    #[error("{kind:?} is not registered for {state} at {protocol}")]
    Unregistered {
        kind: PacketKind,
        state: State,
        protocol: Protocol,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-state packet dispatcher installed on a connection.
///
/// Handlers are cheap clones (usually an `Arc` inside); the read loop clones
/// the current one out of the lock before awaiting it.
pub trait SessionHandler: Clone + Send + Sync + 'static {
    fn handle_packet(&self, pc: PacketContext) -> BoxFuture<'static, ()>;

    /// Runs while the connection's swap lock is held: it must not install
    /// another handler on the same connection.
    fn activated(&self) -> BoxFuture<'static, ()> {
        async {}.boxed()
    }

    fn deactivated(&self) {}

    /// Called exactly once, after the last `handle_packet`.
    fn disconnected(&self) -> BoxFuture<'static, ()>;

    /// Inert handler left behind after teardown.
    fn nop() -> Self;
}

#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// zlib level for outbound frames, -1 for the default.
    pub compression_level: i32,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(20),
            compression_level: -1,
        }
    }
}

struct CodecState {
    protocol: Protocol,
    reader_state: State,
    writer_state: State,
}

struct Writer {
    stream: Option<OwnedWriteHalf>,
    encoder: FrameEncoder,
}

/// One framed Minecraft socket: codec state, the active session handler and
/// the read loop that feeds it.
pub struct MinecraftConn<H: SessionHandler> {
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    /// Direction of the packets this side reads.
    direction: Direction,
    registries: &'static Registries,
    config: ConnConfig,
    codec: RwLock<CodecState>,
    decoder: Mutex<FrameDecoder>,
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Writer>,
    handler: RwLock<H>,
    /// Held across a whole handler swap, hooks included.
    swap: tokio::sync::Mutex<()>,
    closed: CancellationToken,
    close_once: AtomicBool,
    known_disconnect: AtomicBool,
    auto_read: watch::Sender<bool>,
    /// Play packets written while the peer is still in config.
    play_queue: Mutex<Vec<Packet>>,
}

impl<H: SessionHandler> MinecraftConn<H> {
    pub fn new(
        stream: TcpStream,
        direction: Direction,
        registries: &'static Registries,
        config: ConnConfig,
    ) -> io::Result<Arc<Self>> {
        let remote_addr = stream.peer_addr()?;
        Self::with_prelude(stream, direction, registries, config, remote_addr, &[])
    }

    /// `remote_addr` overrides the socket peer (PROXY protocol); `buffered`
    /// holds bytes already read past a PROXY header.
    pub fn with_prelude(
        stream: TcpStream,
        direction: Direction,
        registries: &'static Registries,
        config: ConnConfig,
        remote_addr: SocketAddr,
        buffered: &[u8],
    ) -> io::Result<Arc<Self>> {
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!("set_nodelay failed: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        let mut decoder = FrameDecoder::new();
        if !buffered.is_empty() {
            decoder.queue_bytes(&mut buffered.to_vec());
        }
        let mut encoder = FrameEncoder::new();
        encoder.set_compression_level(config.compression_level);
        let (auto_read, _) = watch::channel(true);

        Ok(Arc::new(Self {
            remote_addr,
            local_addr,
            direction,
            registries,
            config,
            codec: RwLock::new(CodecState {
                protocol: Protocol::MINIMUM,
                reader_state: State::Handshake,
                writer_state: State::Handshake,
            }),
            decoder: Mutex::new(decoder),
            reader: tokio::sync::Mutex::new(Some(read_half)),
            writer: tokio::sync::Mutex::new(Writer {
                stream: Some(write_half),
                encoder,
            }),
            handler: RwLock::new(H::nop()),
            swap: tokio::sync::Mutex::new(()),
            closed: CancellationToken::new(),
            close_once: AtomicBool::new(false),
            known_disconnect: AtomicBool::new(false),
            auto_read,
            play_queue: Mutex::new(Vec::new()),
        }))
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn protocol(&self) -> Protocol {
        self.codec.read().protocol
    }

    pub fn set_protocol(&self, protocol: Protocol) {
        self.codec.write().protocol = protocol;
    }

    /// State used to decode inbound packets.
    pub fn state(&self) -> State {
        self.codec.read().reader_state
    }

    pub fn writer_state(&self) -> State {
        self.codec.read().writer_state
    }

    pub fn set_state(&self, state: State) {
        let mut codec = self.codec.write();
        codec.reader_state = state;
        codec.writer_state = state;
    }

    pub fn set_reader_state(&self, state: State) {
        self.codec.write().reader_state = state;
    }

    pub fn set_writer_state(&self, state: State) {
        self.codec.write().writer_state = state;
    }

    pub fn session_handler(&self) -> H {
        self.handler.read().clone()
    }

    /// Swap the active handler: `deactivated` on the old one, then `activated`
    /// on the new one. Concurrent swaps run one after another, and none runs
    /// once teardown started.
    pub async fn set_session_handler(&self, handler: H) {
        if self.is_closed() {
            return;
        }
        let _swap = self.swap.lock().await;
        if self.is_closed() {
            return;
        }
        let old = std::mem::replace(&mut *self.handler.write(), handler.clone());
        old.deactivated();
        handler.activated().await;
    }

    pub fn set_auto_reading(&self, enabled: bool) {
        self.auto_read.send_replace(enabled);
    }

    pub async fn set_compression_threshold(&self, threshold: i32) {
        let mut writer = self.writer.lock().await;
        writer.encoder.set_compression_threshold(threshold);
        self.decoder.lock().set_compression_threshold(threshold);
    }

    pub async fn enable_encryption(&self, secret: &[u8]) -> Result<(), ConnError> {
        let mut writer = self.writer.lock().await;
        writer.encoder.enable_encryption(secret)?;
        self.decoder.lock().enable_encryption(secret)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when this connection closes.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.child_token()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn known_disconnect(&self) -> bool {
        self.known_disconnect.load(Ordering::SeqCst)
    }

    /// Marks the upcoming close as expected so teardown stays quiet.
    pub fn set_known_disconnect(&self) {
        self.known_disconnect.store(true, Ordering::SeqCst);
    }

    /// Idempotent; the read loop performs the teardown.
    pub fn close(&self) {
        if self.close_once.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!(addr = %self.remote_addr, "closing connection");
        self.closed.cancel();
        self.auto_read.send_replace(true);
    }

    /// Send a final packet, then close.
    pub async fn close_with(&self, packet: impl Into<Packet>) {
        self.set_known_disconnect();
        if let Err(e) = self.write_packet(packet).await {
            trace!(addr = %self.remote_addr, "final packet not delivered: {}", e);
        }
        self.close();
    }

    fn outbound(&self) -> (Protocol, State, Direction) {
        let codec = self.codec.read();
        (codec.protocol, codec.writer_state, self.direction.opposite())
    }

    /// Encode and write a typed packet using the current writer state.
    pub async fn write_packet(&self, packet: impl Into<Packet>) -> Result<(), ConnError> {
        let packet = packet.into();
        let (protocol, state, direction) = self.outbound();
        let kind = packet.kind();
        let id = match self
            .registries
            .lookup(state, direction, protocol)
            .and_then(|r| r.id(kind))
        {
            Some(id) => id,
            None => {
                let play_id = self
                    .registries
                    .lookup(State::Play, direction, protocol)
                    .and_then(|r| r.id(kind));
                if state == State::Config && play_id.is_some() {
                    trace!(addr = %self.remote_addr, ?kind, "holding play packet until config ends");
                    self.play_queue.lock().push(packet);
                    return Ok(());
                }
                return Err(ConnError::Unregistered {
                    kind,
                    state,
                    protocol,
                });
            }
        };
        let mut body = BytesMut::new();
        write_varint(&mut body, id);
        packet.encode(&CodecContext::new(protocol, direction, state), &mut body);
        self.write_raw(&body).await
    }

    pub async fn write_packets(&self, packets: Vec<Packet>) -> Result<(), ConnError> {
        for packet in packets {
            self.write_packet(packet).await?;
        }
        Ok(())
    }

    /// Write a frame body (packet id + data) verbatim. Any failure closes.
    pub async fn write_raw(&self, body: &[u8]) -> Result<(), ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let result = {
            let mut writer = self.writer.lock().await;
            let Writer { stream, encoder } = &mut *writer;
            match stream.as_mut() {
                None => Err(ConnError::Closed),
                Some(stream) => match encoder.encode(body) {
                    Err(e) => Err(ConnError::Codec(e)),
                    Ok(frame) => {
                        match tokio::time::timeout(self.config.write_timeout, stream.write_all(&frame))
                            .await
                        {
                            Ok(r) => r.map_err(ConnError::from),
                            Err(_) => Err(ConnError::Timeout),
                        }
                    }
                },
            }
        };
        if let Err(e) = &result {
            match e {
                ConnError::Timeout => self.set_known_disconnect(),
                ConnError::Io(io) if is_closed_error(io) => self.set_known_disconnect(),
                _ => {}
            }
            self.close();
        }
        result
    }

    /// Write any play packets held back during config.
    pub async fn flush_play_queue(&self) -> Result<(), ConnError> {
        let queued = std::mem::take(&mut *self.play_queue.lock());
        for packet in queued {
            self.write_packet(packet).await?;
        }
        Ok(())
    }

    fn decode(&self, body: BytesMut) -> Result<PacketContext, CodecError> {
        let payload = body.clone().freeze();
        let mut body = body;
        let packet_id = read_varint(&mut body)?;
        let (protocol, state) = {
            let codec = self.codec.read();
            (codec.protocol, codec.reader_state)
        };
        let kind = self
            .registries
            .lookup(state, self.direction, protocol)
            .and_then(|r| r.kind(packet_id));
        let mut left_bytes = false;
        let packet = match kind {
            None => None,
            Some(kind) => {
                let ctx = CodecContext::new(protocol, self.direction, state);
                let packet = Packet::decode(kind, &ctx, &mut body)?;
                if !body.is_empty() {
                    left_bytes = true;
                    trace!(
                        addr = %self.remote_addr,
                        ?kind,
                        left = body.len(),
                        "decoder left bytes"
                    );
                }
                Some(packet)
            }
        };
        Ok(PacketContext {
            direction: self.direction,
            protocol,
            packet_id,
            packet,
            payload,
            left_bytes,
        })
    }

    /// Drive the connection until it closes. Must be spawned once.
    pub async fn read_loop(self: Arc<Self>) {
        let Some(mut reader) = self.reader.lock().await.take() else {
            return;
        };
        let mut auto_read = self.auto_read.subscribe();
        let mut tmp = vec![0u8; 8192];

        'read: loop {
            while !*auto_read.borrow_and_update() {
                tokio::select! {
                    _ = self.closed.cancelled() => break 'read,
                    changed = auto_read.changed() => {
                        if changed.is_err() {
                            break 'read;
                        }
                    }
                }
            }
            if self.is_closed() {
                break;
            }

            let frame = self.decoder.lock().try_next_frame();
            match frame {
                Ok(Some(body)) => {
                    let pc = match self.decode(body) {
                        Ok(pc) => pc,
                        Err(e) => {
                            debug!(addr = %self.remote_addr, "could not decode packet: {}", e);
                            break;
                        }
                    };
                    let handler = self.handler.read().clone();
                    if AssertUnwindSafe(handler.handle_packet(pc))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        error!(addr = %self.remote_addr, "recovered from panic in packet handler");
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(addr = %self.remote_addr, "protocol error: {}", e);
                    break;
                }
            }

            let read = tokio::select! {
                _ = self.closed.cancelled() => break,
                r = tokio::time::timeout(self.config.read_timeout, reader.read(&mut tmp)) => r,
            };
            match read {
                Err(_) => {
                    debug!(addr = %self.remote_addr, "read timed out");
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => self.decoder.lock().queue_bytes(&mut tmp[..n]),
                Ok(Err(e)) if is_retryable(&e) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(Err(e)) if is_closed_error(&e) => break,
                Ok(Err(e)) => {
                    warn!(addr = %self.remote_addr, "read error: {}", e);
                    break;
                }
            }
        }

        self.teardown().await;
    }

    async fn teardown(&self) {
        self.close();
        {
            let mut writer = self.writer.lock().await;
            if let Some(mut stream) = writer.stream.take() {
                let _ = stream.shutdown().await;
            }
        }
        // waits out a swap in progress; later ones see the closed flag
        let _swap = self.swap.lock().await;
        let handler = self.handler.read().clone();
        if AssertUnwindSafe(handler.disconnected())
            .catch_unwind()
            .await
            .is_err()
        {
            error!(addr = %self.remote_addr, "recovered from panic in disconnect handler");
        }
        // drop the handler so player <-> connection references can be freed
        *self.handler.write() = H::nop();
        self.play_queue.lock().clear();
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_closed_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{Handshake, KeepAlive, StatusRequest};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    enum Seen {
        Packet(PacketContext),
        Disconnected,
    }

    #[derive(Clone)]
    struct Recorder {
        tx: Option<mpsc::UnboundedSender<Seen>>,
    }

    impl SessionHandler for Recorder {
        fn handle_packet(&self, pc: PacketContext) -> BoxFuture<'static, ()> {
            let tx = self.tx.clone();
            async move {
                if let Some(tx) = tx {
                    let _ = tx.send(Seen::Packet(pc));
                }
            }
            .boxed()
        }

        fn disconnected(&self) -> BoxFuture<'static, ()> {
            let tx = self.tx.clone();
            async move {
                if let Some(tx) = tx {
                    let _ = tx.send(Seen::Disconnected);
                }
            }
            .boxed()
        }

        fn nop() -> Self {
            Recorder { tx: None }
        }
    }

    type Conn = MinecraftConn<Recorder>;

    async fn pair() -> (Arc<Conn>, Arc<Conn>, mpsc::UnboundedReceiver<Seen>) {
        let registries = Registries::global().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = Conn::new(
            client.unwrap(),
            Direction::ClientBound,
            registries,
            ConnConfig::default(),
        )
        .unwrap();
        let server = Conn::new(
            accepted.unwrap().0,
            Direction::ServerBound,
            registries,
            ConnConfig::default(),
        )
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        server.set_session_handler(Recorder { tx: Some(tx) }).await;
        tokio::spawn(server.clone().read_loop());
        (client, server, rx)
    }

    fn handshake() -> Handshake {
        Handshake {
            protocol_version: 765,
            server_address: "play.example.com".into(),
            port: 25565,
            next_status: 1,
        }
    }

    #[tokio::test]
    async fn test_packet_then_single_disconnect() {
        let (client, _server, mut rx) = pair().await;
        client.write_packet(handshake()).await.unwrap();

        match rx.recv().await.unwrap() {
            Seen::Packet(pc) => {
                assert_eq!(pc.packet_id, 0);
                assert!(matches!(pc.packet, Some(Packet::Handshake(ref h)) if h.port == 25565));
                assert!(!pc.left_bytes);
            }
            other => panic!("unexpected {:?}", other),
        }

        client.close();
        tokio::spawn(client.clone().read_loop());
        assert!(matches!(rx.recv().await.unwrap(), Seen::Disconnected));
        // channel closes once the handler has been replaced
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_state_switch_applies_to_next_packet() {
        let (client, server, mut rx) = pair().await;
        client.write_packet(handshake()).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Seen::Packet(_))));

        server.set_state(State::Status);
        server.set_protocol(Protocol::V1_20_3);
        client.set_state(State::Status);
        client.write_packet(StatusRequest).await.unwrap();
        match rx.recv().await.unwrap() {
            Seen::Packet(pc) => {
                assert!(matches!(pc.packet, Some(Packet::StatusRequest(_))));
                assert_eq!(pc.protocol, Protocol::V1_20_3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_packet_keeps_payload() {
        let (client, _server, mut rx) = pair().await;
        client.write_raw(&[0x7E, 1, 2, 3]).await.unwrap();
        match rx.recv().await.unwrap() {
            Seen::Packet(pc) => {
                assert!(pc.packet.is_none());
                assert_eq!(pc.packet_id, 0x7E);
                assert_eq!(&pc.payload[..], &[0x7E, 1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auto_read_pauses_delivery() {
        let (client, server, mut rx) = pair().await;
        server.set_auto_reading(false);
        client.write_packet(handshake()).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(waited.is_err());
        server.set_auto_reading(true);
        assert!(matches!(rx.recv().await, Some(Seen::Packet(_))));
    }

    #[tokio::test]
    async fn test_compressed_and_encrypted_session() {
        let (client, server, mut rx) = pair().await;
        let secret = [3u8; 16];
        client.set_compression_threshold(0).await;
        client.enable_encryption(&secret).await.unwrap();
        server.set_compression_threshold(0).await;
        server.enable_encryption(&secret).await.unwrap();
        client.write_packet(handshake()).await.unwrap();
        match rx.recv().await.unwrap() {
            Seen::Packet(pc) => assert!(matches!(pc.packet, Some(Packet::Handshake(_)))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_play_packet_held_during_config() {
        let (client, _server, _rx) = pair().await;
        client.set_protocol(Protocol::V1_20_3);
        client.set_state(State::Config);
        // keep-alive exists in config; a play-only packet is held back
        client.write_packet(KeepAlive { random_id: 1 }).await.unwrap();
        client
            .write_packet(crate::packets::ChatAcknowledgement { offset: 1 })
            .await
            .unwrap();
        assert_eq!(client.play_queue.lock().len(), 1);
        client.set_state(State::Play);
        client.flush_play_queue().await.unwrap();
        assert!(client.play_queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_packet_is_an_error() {
        let (client, _server, _rx) = pair().await;
        let err = client.write_packet(StatusRequest).await.unwrap_err();
        assert!(matches!(err, ConnError::Unregistered { .. }));
        assert!(!client.is_closed());
    }

    #[derive(Clone)]
    struct Tracked {
        name: &'static str,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl Tracked {
        fn record(&self, what: &str) {
            if let Some(log) = &self.log {
                log.lock().push(format!("{}:{}", what, self.name));
            }
        }
    }

    impl SessionHandler for Tracked {
        fn handle_packet(&self, _pc: PacketContext) -> BoxFuture<'static, ()> {
            async {}.boxed()
        }

        fn activated(&self) -> BoxFuture<'static, ()> {
            let this = self.clone();
            async move {
                this.record("start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                this.record("end");
            }
            .boxed()
        }

        fn deactivated(&self) {
            self.record("deactivated");
        }

        fn disconnected(&self) -> BoxFuture<'static, ()> {
            let this = self.clone();
            async move { this.record("disconnected") }.boxed()
        }

        fn nop() -> Self {
            Tracked { name: "nop", log: None }
        }
    }

    #[tokio::test]
    async fn test_concurrent_swaps_do_not_interleave() {
        let registries = Registries::global().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = MinecraftConn::<Tracked>::new(
            stream.unwrap(),
            Direction::ClientBound,
            registries,
            ConnConfig::default(),
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = |name| Tracked {
            name,
            log: Some(log.clone()),
        };
        conn.set_session_handler(handler("first")).await;
        tokio::join!(
            conn.set_session_handler(handler("a")),
            conn.set_session_handler(handler("b")),
        );

        let log = log.lock().clone();
        assert_eq!(log.len(), 8, "{:?}", log);
        assert_eq!(&log[..3], &["start:first", "end:first", "deactivated:first"]);
        // each activation finishes before the next swap replaces it
        let (winner, loser) = if log[3] == "start:a" { ("b", "a") } else { ("a", "b") };
        assert_eq!(
            &log[3..],
            &[
                format!("start:{}", loser),
                format!("end:{}", loser),
                format!("deactivated:{}", loser),
                format!("start:{}", winner),
                format!("end:{}", winner),
            ]
        );
        assert_eq!(conn.session_handler().name, winner);
    }

    #[tokio::test]
    async fn test_no_swap_after_close() {
        let registries = Registries::global().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let conn = MinecraftConn::<Tracked>::new(
            stream.unwrap(),
            Direction::ClientBound,
            registries,
            ConnConfig::default(),
        )
        .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        conn.set_session_handler(Tracked {
            name: "live",
            log: Some(log.clone()),
        })
        .await;
        conn.close();
        conn.clone().read_loop().await;
        conn.set_session_handler(Tracked {
            name: "late",
            log: Some(log.clone()),
        })
        .await;
        assert_eq!(
            log.lock().clone(),
            vec!["start:live", "end:live", "disconnected:live"]
        );
        assert_eq!(conn.session_handler().name, "nop");
    }
}
