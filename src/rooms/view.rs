//! A mounted chat page: room resolver, sync channel and composer driven by
//! commands from the browser.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};

use crate::{
    session::SessionState,
    store::{Message, MessageStore},
    AppResult,
};

use super::{composer::Composer, resolver::{RoomResolver, RoomStorage}, sync::SyncChannel};

/// How long the "joined" indicator stays up.
pub const JOIN_NOTICE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    Input { text: String },
    Send,
    Key { key: String },
    /// Room typed into the side field.
    Join { room: String },
    /// Room confirmed in the custom room dialog.
    Custom { room: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Update {
    Room { room: String },
    Messages { messages: Vec<Message>, scroll: bool },
    Input { text: String },
    Joined { room: String },
    JoinedCleared,
    SignedOut,
}

enum Wake {
    Snapshot(bool),
    NoticeExpired,
    Session(bool),
}

pub struct ChatView<M, R> {
    store: M,
    session: watch::Receiver<SessionState>,
    rooms: RoomResolver<R>,
    sync: SyncChannel<M>,
    composer: Composer,
    notice: Option<Instant>,
}

impl<M: MessageStore, R: RoomStorage> ChatView<M, R> {
    /// Resolves the room and opens its subscription.
    pub async fn mount(store: M, storage: R, session: watch::Receiver<SessionState>) -> AppResult<Self> {
        let rooms = RoomResolver::resolve(storage).await?;
        let mut sync = SyncChannel::new(store.clone());
        sync.open(rooms.room()).await?;

        Ok(Self {
            store,
            session,
            rooms,
            sync,
            composer: Composer::default(),
            notice: None,
        })
    }

    pub fn room(&self) -> &str {
        self.rooms.room()
    }

    pub fn messages(&self) -> &[Message] {
        self.sync.messages()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Whether the "joined" indicator is showing.
    pub fn joined(&self) -> bool {
        self.notice.is_some()
    }

    pub async fn apply(&mut self, command: Command) -> AppResult<Vec<Update>> {
        let identity = self.session.borrow().identity.clone();

        let updates = match command {
            Command::Input { text } => {
                self.composer.set_input(text);
                Vec::new()
            }
            Command::Send => {
                let sent = self.composer.send(&self.store, self.rooms.room(), identity.as_ref()).await?;
                self.cleared_input(sent)
            }
            Command::Key { key } => {
                let sent = self
                    .composer
                    .key_press(&key, &self.store, self.rooms.room(), identity.as_ref())
                    .await?;
                self.cleared_input(sent)
            }
            Command::Join { room } => {
                if !self.rooms.join(&room).await? {
                    return Ok(Vec::new());
                }
                self.sync.open(self.rooms.room()).await?;
                self.notice = Some(Instant::now() + JOIN_NOTICE);
                vec![Update::Room { room: room.clone() }, Update::Joined { room }]
            }
            Command::Custom { room } => {
                if !self.rooms.set_custom(&room).await? {
                    return Ok(Vec::new());
                }
                self.sync.open(self.rooms.room()).await?;
                vec![Update::Room { room }]
            }
        };

        Ok(updates)
    }

    fn cleared_input(&self, sent: bool) -> Vec<Update> {
        if sent {
            vec![Update::Input { text: self.composer.input().to_owned() }]
        } else {
            Vec::new()
        }
    }

    /// Waits for whatever the browser should hear about next. `None` when the
    /// subscription has ended and the view should close.
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            let wake = tokio::select! {
                got = self.sync.next() => Wake::Snapshot(got),
                _ = expire(self.notice) => Wake::NoticeExpired,
                changed = self.session.changed() => Wake::Session(changed.is_ok()),
            };

            match wake {
                Wake::Snapshot(false) => return None,
                Wake::Snapshot(true) => {
                    return Some(Update::Messages {
                        messages: self.sync.messages().to_vec(),
                        scroll: true,
                    });
                }
                Wake::NoticeExpired => {
                    self.notice = None;
                    return Some(Update::JoinedCleared);
                }
                // Provider gone; nothing more will change.
                Wake::Session(false) => return None,
                Wake::Session(true) => {
                    if self.session.borrow_and_update().identity.is_none() {
                        return Some(Update::SignedOut);
                    }
                }
            }
        }
    }

    pub fn unmount(mut self) {
        self.sync.close();
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rooms::resolver::MemoryRoomStorage,
        session::{Identity, SessionProvider},
        store::{MemoryStore, NewMessage},
    };

    fn signed_in() -> SessionProvider {
        let provider = SessionProvider::new();
        provider.auth_state_changed(Some(Identity {
            uid: "u1".to_owned(),
            display_name: "Ada".to_owned(),
            photo_url: None,
        }));
        provider
    }

    async fn mount(store: &MemoryStore, room: &str, provider: &SessionProvider) -> ChatView<MemoryStore, MemoryRoomStorage> {
        ChatView::mount(store.clone(), MemoryRoomStorage::with_room(room), provider.subscribe())
            .await
            .unwrap()
    }

    fn texts(update: &Update) -> Vec<&str> {
        match update {
            Update::Messages { messages, .. } => messages.iter().map(|m| m.text.as_str()).collect(),
            other => panic!("expected messages, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_round_trips_through_the_subscription() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "lobby", &provider).await;

        let first = view.next_update().await.unwrap();
        assert_eq!(first, Update::Messages { messages: Vec::new(), scroll: true });

        assert!(view.apply(Command::Input { text: "hi".to_owned() }).await.unwrap().is_empty());
        assert_eq!(view.composer().input(), "hi");

        let updates = view.apply(Command::Send).await.unwrap();
        assert_eq!(updates, vec![Update::Input { text: String::new() }]);

        let update = view.next_update().await.unwrap();
        assert_eq!(texts(&update), ["hi"]);
        assert_eq!(view.messages()[0].sender_id, "Ada");
    }

    #[tokio::test]
    async fn blank_send_changes_nothing() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "lobby", &provider).await;

        view.apply(Command::Input { text: "  ".to_owned() }).await.unwrap();
        assert!(view.apply(Command::Key { key: "Enter".to_owned() }).await.unwrap().is_empty());
        assert_eq!(view.composer().input(), "  ");
    }

    #[tokio::test(start_paused = true)]
    async fn join_switches_rooms_and_flashes_the_notice() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let storage = MemoryRoomStorage::with_room("lobby");
        let mut view = ChatView::mount(store.clone(), storage.clone(), provider.subscribe()).await.unwrap();
        view.next_update().await.unwrap();

        let updates = view.apply(Command::Join { room: "roomX".to_owned() }).await.unwrap();
        assert_eq!(
            updates,
            vec![
                Update::Room { room: "roomX".to_owned() },
                Update::Joined { room: "roomX".to_owned() },
            ]
        );
        assert_eq!(view.room(), "roomX");
        assert_eq!(storage.get().as_deref(), Some("roomX"));
        assert!(view.joined());

        let started = Instant::now();
        assert_eq!(view.next_update().await, Some(Update::Messages { messages: Vec::new(), scroll: true }));
        assert_eq!(view.next_update().await, Some(Update::JoinedCleared));
        let elapsed = started.elapsed();
        assert!(elapsed >= JOIN_NOTICE - Duration::from_millis(1), "{elapsed:?}");
        assert!(elapsed < JOIN_NOTICE + Duration::from_millis(10), "{elapsed:?}");
        assert!(!view.joined());
    }

    #[tokio::test]
    async fn custom_room_switches_without_the_notice() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "lobby", &provider).await;

        let updates = view.apply(Command::Custom { room: "team".to_owned() }).await.unwrap();
        assert_eq!(updates, vec![Update::Room { room: "team".to_owned() }]);
        assert_eq!(view.room(), "team");
        assert!(!view.joined());

        assert!(view.apply(Command::Custom { room: String::new() }).await.unwrap().is_empty());
        assert_eq!(view.room(), "team");
    }

    #[tokio::test(start_paused = true)]
    async fn old_room_is_silent_after_a_switch() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "old", &provider).await;
        view.next_update().await.unwrap();

        store.append("old", NewMessage { text: "queued".to_owned(), sender_id: "Eve".to_owned() }).await.unwrap();
        view.apply(Command::Join { room: "new".to_owned() }).await.unwrap();
        store.append("old", NewMessage { text: "late".to_owned(), sender_id: "Eve".to_owned() }).await.unwrap();
        store.append("new", NewMessage { text: "fresh".to_owned(), sender_id: "Ada".to_owned() }).await.unwrap();

        loop {
            match view.next_update().await.unwrap() {
                Update::Messages { messages, .. } => {
                    assert!(messages.iter().all(|m| m.sender_id != "Eve"), "{messages:?}");
                    if !messages.is_empty() {
                        break;
                    }
                }
                Update::JoinedCleared => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(view.messages()[0].text, "fresh");
    }

    #[tokio::test]
    async fn displayed_order_never_goes_back_in_time() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "lobby", &provider).await;
        view.next_update().await.unwrap();

        for n in 0..5 {
            view.apply(Command::Input { text: format!("m{n}") }).await.unwrap();
            view.apply(Command::Send).await.unwrap();
        }

        while view.messages().len() < 5 {
            view.next_update().await.unwrap();
            let messages = view.messages();
            assert!(messages.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        }
    }

    #[tokio::test]
    async fn logout_signs_the_view_out() {
        let store = MemoryStore::new();
        let provider = signed_in();
        let mut view = mount(&store, "lobby", &provider).await;
        view.next_update().await.unwrap();

        provider.auth_state_changed(None);
        assert_eq!(view.next_update().await, Some(Update::SignedOut));

        view.apply(Command::Input { text: "anyone?".to_owned() }).await.unwrap();
        assert!(view.apply(Command::Send).await.unwrap().is_empty());
        view.unmount();
    }

    #[test]
    fn commands_and_updates_on_the_wire() {
        let command: Command = serde_json::from_str(r#"{"type":"join","data":{"room":"roomX"}}"#).unwrap();
        assert_eq!(command, Command::Join { room: "roomX".to_owned() });
        let command: Command = serde_json::from_str(r#"{"type":"send"}"#).unwrap();
        assert_eq!(command, Command::Send);

        assert_eq!(
            serde_json::to_value(Update::JoinedCleared).unwrap(),
            serde_json::json!({ "type": "joined_cleared" })
        );
        assert_eq!(
            serde_json::to_value(Update::Input { text: String::new() }).unwrap(),
            serde_json::json!({ "type": "input", "data": { "text": "" } })
        );
    }
}
