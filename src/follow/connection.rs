use tokio::sync::mpsc;

use crate::cluster::{AbortHandle, ChunkSink, StreamEvent};
use crate::types::ContainerRef;

/// Key into the connection registry: `pod "/" container`.
pub type ConnKey = String;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnStatus {
    Connected,
    Error,
    Closed,
}

/// One registry entry. Status moves Connected -> Error -> Closed (or straight
/// to Closed); only the follower task and stream events mutate it.
pub struct Connection {
    pub container: ContainerRef,
    pub abort: AbortHandle,
    pub status: ConnStatus,
    /// Attach counter; events from a replaced stream carry a stale one.
    pub generation: u64,
}

impl Connection {
    pub fn is_live(&self) -> bool {
        self.status == ConnStatus::Connected
    }
}

/// Message from a per-container pipeline into the follower task.
pub enum ConnEvent {
    Data(Vec<u8>),
    Lifecycle(StreamEvent),
}

pub struct ConnMsg {
    pub key: ConnKey,
    pub generation: u64,
    pub event: ConnEvent,
}

/// The sink handed to the adapter for one stream: tags each chunk with the
/// connection key and forwards it to the follower task. Send is synchronous,
/// so the adapter's pump never blocks on us.
pub(crate) struct KeyedSink {
    key: ConnKey,
    generation: u64,
    tx: mpsc::UnboundedSender<ConnMsg>,
}

impl KeyedSink {
    pub(crate) fn new(key: ConnKey, generation: u64, tx: mpsc::UnboundedSender<ConnMsg>) -> Self {
        Self {
            key,
            generation,
            tx,
        }
    }
}

impl ChunkSink for KeyedSink {
    fn write(&mut self, chunk: &[u8]) {
        let _ = self.tx.send(ConnMsg {
            key: self.key.clone(),
            generation: self.generation,
            event: ConnEvent::Data(chunk.to_vec()),
        });
    }
}

/// Forwards a stream's lifecycle events into the follower task, tagged with
/// key and generation. Ends when the adapter drops its event sender.
pub(crate) fn spawn_event_pump(
    key: ConnKey,
    generation: u64,
    mut events: mpsc::Receiver<StreamEvent>,
    tx: mpsc::UnboundedSender<ConnMsg>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let msg = ConnMsg {
                key: key.clone(),
                generation,
                event: ConnEvent::Lifecycle(event),
            };
            if tx.send(msg).is_err() {
                break;
            }
        }
    });
}
