use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{session::{return_target, Identity, SessionHub, CSRF_STATE, IDENTITY, PKCE_VERIFIER, RETURN_URL}, AppResult};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(sessions): State<SessionHub>,
    session: Session
) -> AppResult<Redirect> {
    if let Some(identity) = session.remove::<Identity>(IDENTITY).await? {
        info!(user = %identity.uid, "signed out");
    }
    // The last used room outlives the sign-in, only auth keys go.
    for key in [RETURN_URL, CSRF_STATE, PKCE_VERIFIER] {
        session.remove_value(key).await?;
    }
    session.save().await?;

    if let Some(id) = session.id() {
        sessions.notify(&id.to_string(), None);
    }

    Ok(Redirect::to(&return_target(return_url, "/login")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{http::header::LOCATION, response::IntoResponse};
    use tower_sessions::MemoryStore;

    use crate::rooms::resolver::{RoomResolver, ROOM_KEY};

    use super::*;

    fn ada() -> Identity {
        Identity {
            uid: "u1".to_owned(),
            display_name: "Ada".to_owned(),
            photo_url: None,
        }
    }

    async fn signed_in() -> Session {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        session.insert(IDENTITY, ada()).await.unwrap();
        session.insert(ROOM_KEY, "roomX").await.unwrap();
        session.save().await.unwrap();
        session
    }

    fn location(redirect: Redirect) -> String {
        let response = redirect.into_response();
        response.headers()[LOCATION].to_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn keeps_the_last_room() {
        let session = signed_in().await;
        let hub = SessionHub::default();

        let redirect = logout(Query(LogoutQuery { return_url: None }), State(hub), session.clone()).await.unwrap();
        assert_eq!(location(redirect), "/login");

        assert_eq!(session.get::<Identity>(IDENTITY).await.unwrap(), None);
        let rooms = RoomResolver::resolve(session).await.unwrap();
        assert_eq!(rooms.room(), "roomX");
    }

    #[tokio::test]
    async fn open_views_are_told() {
        let session = signed_in().await;
        let hub = SessionHub::default();
        let provider = hub.mount(&session).await.unwrap();
        let mut rx = provider.subscribe();

        logout(Query(LogoutQuery { return_url: None }), State(hub), session).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().identity, None);
    }

    #[tokio::test]
    async fn foreign_return_urls_are_ignored() {
        let hub = SessionHub::default();

        let redirect = logout(
            Query(LogoutQuery { return_url: Some("https://evil.example/".to_owned()) }),
            State(hub.clone()),
            signed_in().await,
        ).await.unwrap();
        assert_eq!(location(redirect), "/login");

        let redirect = logout(
            Query(LogoutQuery { return_url: Some("/chat".to_owned()) }),
            State(hub),
            signed_in().await,
        ).await.unwrap();
        assert_eq!(location(redirect), "/chat");
    }
}
