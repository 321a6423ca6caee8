use axum::{debug_handler, extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade}, http::StatusCode, response::{IntoResponse, Response}};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::watch;
use tower_sessions::Session;
use tracing::{debug, info, warn};

use crate::{session::{SessionHub, SessionState}, store::Store, AppResult, AppState};

use super::view::{ChatView, Command, Update};

enum Event {
    Update(Option<Update>),
    Socket(Option<Result<Message, axum::Error>>),
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    State(store): State<Store>,
    State(sessions): State<SessionHub>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let provider = sessions.mount(&session).await?;
    if provider.current().identity.is_none() {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    // Watch before upgrading so a logout in between still reaches the view.
    let auth = provider.subscribe();
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = run_view(socket, store, session, auth).await {
            warn!("chat view closed: {:#}", err.0);
        }
    }))
}

async fn run_view(socket: WebSocket, store: Store, session: Session, auth: watch::Receiver<SessionState>) -> AppResult<()> {
    let identity = auth.borrow().identity.clone();
    let mut view = ChatView::mount(store, session, auth).await?;
    let (mut sender, mut receiver) = socket.split();

    if let Some(identity) = identity {
        info!(user = %identity.uid, room = view.room(), "chat view mounted");
    }
    push(&mut sender, &Update::Room { room: view.room().to_owned() }).await?;

    loop {
        let event = tokio::select! {
            update = view.next_update() => Event::Update(update),
            msg = receiver.next() => Event::Socket(msg),
        };

        match event {
            Event::Update(None) => break,
            Event::Update(Some(update)) => {
                push(&mut sender, &update).await?;
                if update == Update::SignedOut {
                    break;
                }
            }
            Event::Socket(Some(Ok(Message::Text(text)))) => {
                let command = match serde_json::from_str::<Command>(text.as_str()) {
                    Ok(command) => command,
                    Err(err) => {
                        debug!("skipping command {:?}: {err}", text.as_str());
                        continue;
                    }
                };
                for update in view.apply(command).await? {
                    push(&mut sender, &update).await?;
                }
            }
            Event::Socket(Some(Ok(Message::Close(_)))) | Event::Socket(None) => break,
            Event::Socket(Some(Ok(_))) => {}
            Event::Socket(Some(Err(err))) => return Err(err.into()),
        }
    }

    debug!(room = view.room(), "chat view unmounted");
    view.unmount();
    let _ = sender.close().await;
    Ok(())
}

async fn push(sender: &mut SplitSink<WebSocket, Message>, update: &Update) -> AppResult<()> {
    sender.send(Message::Text(serde_json::to_string(update)?.into())).await?;
    Ok(())
}
