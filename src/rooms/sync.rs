use tracing::debug;

use crate::{
    store::{Message, MessageStore, Subscription},
    AppResult,
};

/// Keeps the view's message list equal to the latest snapshot of one room.
pub struct SyncChannel<M> {
    store: M,
    subscription: Option<Subscription>,
    messages: Vec<Message>,
}

impl<M: MessageStore> SyncChannel<M> {
    pub fn new(store: M) -> Self {
        Self {
            store,
            subscription: None,
            messages: Vec::new(),
        }
    }

    /// Replaces the current subscription with one for `room`. The old one is
    /// dropped before the new one is requested.
    pub async fn open(&mut self, room: &str) -> AppResult<()> {
        self.close();
        debug!(room, "opening subscription");
        self.subscription = Some(self.store.subscribe(room).await?);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!(room = subscription.room(), "closing subscription");
        }
        self.messages.clear();
    }

    pub fn room(&self) -> Option<&str> {
        self.subscription.as_ref().map(Subscription::room)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Waits for the next snapshot and takes it as the new message list.
    /// Returns `false` once the subscription has ended; never resolves while
    /// closed.
    pub async fn next(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };

        match subscription.next().await {
            Some(snapshot) => {
                self.messages = snapshot;
                true
            }
            None => false,
        }
    }
}
