use std::sync::{Arc, Mutex, PoisonError};

use tower_sessions::Session;

use crate::AppResult;

/// Storage key holding the last used room id.
pub const ROOM_KEY: &str = "chatRoom";
pub const ROOM_PREFIX: &str = "chatRoom-";

/// Where the last used room id survives between visits.
pub trait RoomStorage: Send + Sync + 'static {
    fn load_room(&self) -> impl Future<Output = AppResult<Option<String>>> + Send;
    fn store_room(&self, room: &str) -> impl Future<Output = AppResult<()>> + Send;
}

impl RoomStorage for Session {
    async fn load_room(&self) -> AppResult<Option<String>> {
        Ok(self.get::<String>(ROOM_KEY).await?)
    }

    async fn store_room(&self, room: &str) -> AppResult<()> {
        self.insert(ROOM_KEY, room).await?;
        // Views outlive the request that upgraded them, so save eagerly.
        self.save().await?;
        Ok(())
    }
}

/// Room storage that lives as long as its clones.
#[derive(Clone, Default)]
pub struct MemoryRoomStorage(Arc<Mutex<Option<String>>>);

impl MemoryRoomStorage {
    pub fn with_room(room: &str) -> Self {
        Self(Arc::new(Mutex::new(Some(room.to_owned()))))
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl RoomStorage for MemoryRoomStorage {
    async fn load_room(&self) -> AppResult<Option<String>> {
        Ok(self.get())
    }

    async fn store_room(&self, room: &str) -> AppResult<()> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(room.to_owned());
        Ok(())
    }
}

/// Decides which room the view shows.
pub struct RoomResolver<S> {
    storage: S,
    room: String,
}

impl<S: RoomStorage> RoomResolver<S> {
    /// Uses the stored room, or generates and stores a fresh one.
    pub async fn resolve(storage: S) -> AppResult<Self> {
        let room = match storage.load_room().await? {
            Some(room) if !room.is_empty() => room,
            _ => {
                let room = generate_room_id();
                storage.store_room(&room).await?;
                room
            }
        };

        Ok(Self { storage, room })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Switches to `room` and remembers it. Empty ids are ignored.
    pub async fn join(&mut self, room: &str) -> AppResult<bool> {
        if room.is_empty() {
            return Ok(false);
        }

        self.storage.store_room(room).await?;
        self.room = room.to_owned();
        Ok(true)
    }

    /// Same switch as [`RoomResolver::join`], confirmed from the custom room dialog.
    pub async fn set_custom(&mut self, room: &str) -> AppResult<bool> {
        self.join(room).await
    }
}

pub fn generate_room_id() -> String {
    format!("{ROOM_PREFIX}{}", base36(rand::random::<u64>()))
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut out = Vec::with_capacity(13);
    loop {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_generated(room: &str) -> bool {
        let Some(token) = room.strip_prefix(ROOM_PREFIX) else {
            return false;
        };
        (1..=13).contains(&token.len())
            && token.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    }

    #[test]
    fn base36_digits() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn generated_ids_have_the_room_shape() {
        for _ in 0..100 {
            let room = generate_room_id();
            assert!(is_generated(&room), "{room}");
        }
    }

    #[tokio::test]
    async fn first_run_generates_and_persists() {
        let storage = MemoryRoomStorage::default();
        let resolver = RoomResolver::resolve(storage.clone()).await.unwrap();

        assert!(is_generated(resolver.room()));
        assert_eq!(storage.get().as_deref(), Some(resolver.room()));
    }

    #[tokio::test]
    async fn stored_room_is_used_unchanged() {
        let storage = MemoryRoomStorage::with_room("roomX");
        let resolver = RoomResolver::resolve(storage.clone()).await.unwrap();

        assert_eq!(resolver.room(), "roomX");
        assert_eq!(storage.get().as_deref(), Some("roomX"));
    }

    #[tokio::test]
    async fn empty_stored_room_counts_as_absent() {
        let storage = MemoryRoomStorage::with_room("");
        let resolver = RoomResolver::resolve(storage).await.unwrap();

        assert!(is_generated(resolver.room()));
    }

    #[tokio::test]
    async fn join_switches_and_persists() {
        let storage = MemoryRoomStorage::with_room("lobby");
        let mut resolver = RoomResolver::resolve(storage.clone()).await.unwrap();

        assert!(resolver.join("roomX").await.unwrap());
        assert_eq!(resolver.room(), "roomX");
        assert_eq!(storage.get().as_deref(), Some("roomX"));

        // No format rules: anything non-empty goes.
        assert!(resolver.set_custom("  weird / room ").await.unwrap());
        assert_eq!(resolver.room(), "  weird / room ");
        assert_eq!(storage.get().as_deref(), Some("  weird / room "));
    }

    #[tokio::test]
    async fn empty_join_is_ignored() {
        let storage = MemoryRoomStorage::with_room("lobby");
        let mut resolver = RoomResolver::resolve(storage.clone()).await.unwrap();

        assert!(!resolver.join("").await.unwrap());
        assert_eq!(resolver.room(), "lobby");
        assert_eq!(storage.get().as_deref(), Some("lobby"));
    }
}
