//! Ordered delivery of signed chat towards the backend.
//!
//! 1.19.3+ clients sign every message against a window of acknowledged
//! messages. Chat, commands and acknowledgements must therefore reach the
//! backend in exactly the order the client produced them, even when a
//! plugin holds a message back. One worker task per player owns the
//! [`ChatState`] and drains the queue in order.

use rampart_protocol_core::{
    ChatAcknowledgement, LastSeenMessages, MinecraftConn, Packet, SessionHandler, LAST_SEEN_WINDOW,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

const MINIMUM_DELAYED_ACK_COUNT: i32 = LAST_SEEN_WINDOW;

/// Acknowledgement bookkeeping between the client and the backend.
#[derive(Debug, Default, Clone)]
pub struct ChatState {
    last_timestamp: i64,
    last_seen: Option<[u8; 3]>,
    delayed_ack_count: i32,
}

impl ChatState {
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Fold acknowledgements that were held back into the offset of a
    /// message that carries its own last-seen window.
    pub fn update_from_message(
        &mut self,
        timestamp: Option<i64>,
        last_seen: Option<LastSeenMessages>,
    ) -> Option<LastSeenMessages> {
        if let Some(timestamp) = timestamp {
            self.last_timestamp = timestamp;
        }
        let last_seen = last_seen?;
        let delayed = std::mem::take(&mut self.delayed_ack_count);
        self.last_seen = Some(last_seen.acknowledged);
        Some(last_seen.with_offset(last_seen.offset + delayed))
    }

    /// Hold acknowledgements back until the whole window has shifted.
    /// Returns the count to forward, 0 to keep waiting.
    pub fn accumulate_ack_count(&mut self, ack_count: i32) -> i32 {
        self.delayed_ack_count += ack_count;
        let to_forward = self.delayed_ack_count - MINIMUM_DELAYED_ACK_COUNT;
        if to_forward >= LAST_SEEN_WINDOW {
            self.last_seen = Some([0; 3]);
            self.delayed_ack_count = MINIMUM_DELAYED_ACK_COUNT;
            return to_forward;
        }
        0
    }

    /// Window for messages the proxy creates on the client's behalf.
    pub fn create_last_seen(&self) -> LastSeenMessages {
        LastSeenMessages::new(0, self.last_seen.unwrap_or_default())
    }
}

type Job = Box<dyn FnOnce(&mut ChatState) -> Option<Packet> + Send>;

struct ChatTask<H: SessionHandler> {
    backend: Arc<MinecraftConn<H>>,
    job: Job,
}

/// Handle to a player's chat worker. The worker stops once every handle is
/// dropped.
pub struct ChatQueue<H: SessionHandler> {
    tx: mpsc::UnboundedSender<ChatTask<H>>,
}

impl<H: SessionHandler> ChatQueue<H> {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChatTask<H>>();
        tokio::spawn(async move {
            let mut state = ChatState::default();
            while let Some(task) = rx.recv().await {
                let Some(packet) = (task.job)(&mut state) else {
                    continue;
                };
                if let Err(e) = task.backend.write_packet(packet).await {
                    trace!("chat packet not delivered: {}", e);
                }
            }
        });
        Self { tx }
    }

    fn queue(&self, backend: Arc<MinecraftConn<H>>, job: Job) {
        if self.tx.send(ChatTask { backend, job }).is_err() {
            trace!("chat queue already stopped");
        }
    }

    /// Queue a client message; `build` receives the adjusted last-seen
    /// window and produces the packet to send, if any.
    pub fn queue_packet<F>(
        &self,
        backend: Arc<MinecraftConn<H>>,
        timestamp: Option<i64>,
        last_seen: Option<LastSeenMessages>,
        build: F,
    ) where
        F: FnOnce(Option<LastSeenMessages>) -> Option<Packet> + Send + 'static,
    {
        self.queue(
            backend,
            Box::new(move |state| build(state.update_from_message(timestamp, last_seen))),
        );
    }

    /// Queue a packet derived from the current state.
    pub fn queue_with<F>(&self, backend: Arc<MinecraftConn<H>>, build: F)
    where
        F: FnOnce(&mut ChatState) -> Option<Packet> + Send + 'static,
    {
        self.queue(backend, Box::new(build));
    }

    pub fn handle_acknowledgement(&self, backend: Arc<MinecraftConn<H>>, offset: i32) {
        self.queue(
            backend,
            Box::new(move |state| {
                let forward = state.accumulate_ack_count(offset);
                (forward > 0).then(|| ChatAcknowledgement { offset: forward }.into())
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use rampart_protocol_core::{
        ConnConfig, Direction, PacketContext, Protocol, Registries, State, UnsignedPlayerCommand,
    };
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_update_flushes_delayed_acks() {
        let mut state = ChatState::default();
        assert_eq!(state.accumulate_ack_count(5), 0);
        let seen = LastSeenMessages::new(3, [1, 2, 3]);
        let updated = state.update_from_message(Some(42), Some(seen)).unwrap();
        assert_eq!(updated.offset, 8);
        assert_eq!(updated.acknowledged, [1, 2, 3]);
        assert_eq!(state.last_timestamp(), 42);
        // delayed count was consumed
        let again = state.update_from_message(None, Some(seen)).unwrap();
        assert_eq!(again.offset, 3);
        assert_eq!(state.create_last_seen(), LastSeenMessages::new(0, [1, 2, 3]));
    }

    #[test]
    fn test_update_without_window() {
        let mut state = ChatState::default();
        assert!(state.update_from_message(Some(7), None).is_none());
        assert_eq!(state.last_timestamp(), 7);
    }

    #[test]
    fn test_ack_forwarded_once_window_shifted() {
        let mut state = ChatState::default();
        assert_eq!(state.accumulate_ack_count(20), 0);
        assert_eq!(state.accumulate_ack_count(19), 0);
        assert_eq!(state.accumulate_ack_count(1), 20);
        assert_eq!(state.create_last_seen().acknowledged, [0; 3]);
        // the minimum stays delayed
        assert_eq!(state.accumulate_ack_count(19), 0);
        assert_eq!(state.accumulate_ack_count(1), 20);
    }

    #[derive(Clone)]
    struct Forward {
        tx: Option<mpsc::UnboundedSender<Packet>>,
    }

    impl SessionHandler for Forward {
        fn handle_packet(&self, pc: PacketContext) -> BoxFuture<'static, ()> {
            let tx = self.tx.clone();
            async move {
                if let (Some(tx), Some(packet)) = (tx, pc.packet) {
                    let _ = tx.send(packet);
                }
            }
            .boxed()
        }

        fn disconnected(&self) -> BoxFuture<'static, ()> {
            async {}.boxed()
        }

        fn nop() -> Self {
            Forward { tx: None }
        }
    }

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let registries = Registries::global().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (out, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let backend =
            MinecraftConn::<Forward>::new(out.unwrap(), Direction::ClientBound, registries, ConnConfig::default())
                .unwrap();
        let server =
            MinecraftConn::<Forward>::new(accepted.unwrap().0, Direction::ServerBound, registries, ConnConfig::default())
                .unwrap();
        for conn in [&backend, &server] {
            conn.set_protocol(Protocol::V1_20_5);
            conn.set_state(State::Play);
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.set_session_handler(Forward { tx: Some(tx) }).await;
        tokio::spawn(server.clone().read_loop());

        let queue = ChatQueue::<Forward>::spawn();
        for i in 0..10 {
            queue.queue_with(backend.clone(), move |_| {
                Some(UnsignedPlayerCommand { command: format!("cmd {}", i) }.into())
            });
            if i == 4 {
                queue.handle_acknowledgement(backend.clone(), 45);
            }
        }
        let mut seen = Vec::new();
        for _ in 0..11 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(matches!(&seen[4], Packet::UnsignedPlayerCommand(c) if c.command == "cmd 4"));
        assert!(matches!(&seen[5], Packet::ChatAcknowledgement(a) if a.offset == 25));
        assert!(matches!(&seen[10], Packet::UnsignedPlayerCommand(c) if c.command == "cmd 9"));
    }
}
