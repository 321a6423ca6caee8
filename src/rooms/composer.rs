use crate::{
    session::Identity,
    store::{MessageStore, NewMessage},
    AppResult,
};

pub const SEND_KEY: &str = "Enter";

/// The message input buffer and its send action.
#[derive(Debug, Default)]
pub struct Composer {
    input: String,
}

impl Composer {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: String) {
        self.input = text;
    }

    /// Appends the buffer to `room` as `identity` and clears it. Blank input
    /// or a missing identity sends nothing and leaves the buffer alone.
    pub async fn send<M: MessageStore>(
        &mut self,
        store: &M,
        room: &str,
        identity: Option<&Identity>,
    ) -> AppResult<bool> {
        let Some(identity) = identity else {
            return Ok(false);
        };
        if self.input.trim().is_empty() {
            return Ok(false);
        }

        store
            .append(room, NewMessage {
                text: self.input.clone(),
                sender_id: identity.display_name.clone(),
            })
            .await?;

        self.input.clear();
        Ok(true)
    }

    /// Enter sends; every other key is left to the input field.
    pub async fn key_press<M: MessageStore>(
        &mut self,
        key: &str,
        store: &M,
        room: &str,
        identity: Option<&Identity>,
    ) -> AppResult<bool> {
        if key != SEND_KEY {
            return Ok(false);
        }
        self.send(store, room, identity).await
    }
}
