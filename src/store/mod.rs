//! The document database behind the chat: one append-only, timestamp-ordered
//! message collection per room, observed through snapshot subscriptions.
//!
//! Rooms are never created explicitly. A room exists as soon as something has
//! been appended under its id, and subscribing to an unknown room yields an
//! empty snapshot.

mod firestore;
mod memory;
mod sqlite;

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::AppResult;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Snapshots queued per subscription before the feeder waits on the view.
const SNAPSHOT_BUFFER: usize = 16;

/// Server-assigned time, in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(datetime: OffsetDateTime) -> Self {
        Self((datetime.unix_timestamp_nanos() / 1_000) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    /// Display name of the sender. Not unique across users.
    pub sender_id: String,
    pub timestamp: Timestamp,
}

/// A message as written by the composer, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub sender_id: String,
}

/// The full ordered message list of a room at some point in time.
pub type Snapshot = Vec<Message>;

pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Appends a message to `chats/{room}/messages` with a server timestamp.
    fn append(&self, room: &str, message: NewMessage) -> impl Future<Output = AppResult<()>> + Send;

    /// Opens a live query over the room's messages ordered by timestamp.
    /// The first snapshot is delivered right away, then one per change.
    fn subscribe(&self, room: &str) -> impl Future<Output = AppResult<Subscription>> + Send;
}

/// A live snapshot query. Dropping it stops the feeder and discards anything
/// still queued.
pub struct Subscription {
    room: String,
    snapshots: mpsc::Receiver<Snapshot>,
    feeder: JoinHandle<()>,
}

impl Subscription {
    /// Spawns `feed` with the sending half of a fresh snapshot queue.
    pub(crate) fn spawn<F, Fut>(room: &str, feed: F) -> Subscription
    where
        F: FnOnce(mpsc::Sender<Snapshot>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, snapshots) = mpsc::channel(SNAPSHOT_BUFFER);
        Subscription {
            room: room.to_owned(),
            snapshots,
            feeder: tokio::spawn(feed(tx)),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Waits for the next snapshot. `None` once the feeder has stopped.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        self.snapshots.poll_recv(cx)
    }
}

/// The configured backend.
#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
    Firestore(FirestoreStore),
}

impl MessageStore for Store {
    async fn append(&self, room: &str, message: NewMessage) -> AppResult<()> {
        match self {
            Store::Memory(store) => store.append(room, message).await,
            Store::Sqlite(store) => store.append(room, message).await,
            Store::Firestore(store) => store.append(room, message).await,
        }
    }

    async fn subscribe(&self, room: &str) -> AppResult<Subscription> {
        match self {
            Store::Memory(store) => store.subscribe(room).await,
            Store::Sqlite(store) => store.subscribe(room).await,
            Store::Firestore(store) => store.subscribe(room).await,
        }
    }
}
