use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::AppResult;

use super::{Message, MessageStore, NewMessage, Snapshot, Subscription, Timestamp};

/// In-process store for development and tests. Nothing survives a restart.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    rooms: Mutex<HashMap<String, Vec<Message>>>,
    /// Room ids of every append, in order.
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(MemoryInner {
                rooms: Mutex::new(HashMap::new()),
                changes,
            }),
        }
    }

    fn snapshot(&self, room: &str) -> Snapshot {
        self.inner
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
            .unwrap_or_default()
    }
}

impl MessageStore for MemoryStore {
    async fn append(&self, room: &str, NewMessage { text, sender_id }: NewMessage) -> AppResult<()> {
        {
            let mut rooms = self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            let messages = rooms.entry(room.to_owned()).or_default();
            // Never let a clock step backwards reorder the room.
            let timestamp = match messages.last() {
                Some(last) => Timestamp::now().max(last.timestamp),
                None => Timestamp::now(),
            };
            messages.push(Message { text, sender_id, timestamp });
        }

        let _ = self.inner.changes.send(room.to_owned());
        Ok(())
    }

    async fn subscribe(&self, room: &str) -> AppResult<Subscription> {
        let store = self.clone();
        let mut changes = self.inner.changes.subscribe();
        let room_id = room.to_owned();

        Ok(Subscription::spawn(room, move |tx| async move {
            loop {
                if tx.send(store.snapshot(&room_id)).await.is_err() {
                    break;
                }

                loop {
                    match changes.recv().await {
                        Ok(changed) if changed == room_id => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(room = %room_id, skipped, "change feed lagged, resending snapshot");
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        }))
    }
}
