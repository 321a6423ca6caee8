use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{include_res, res::{escape_html, fill_template}, session::SessionHub, AppResult};

use super::resolver::RoomResolver;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(sessions): State<SessionHub>,
    session: Session,
) -> AppResult<Response> {
    let state = sessions.mount(&session).await?.current();
    if let Some(target) = state.redirect() {
        return Ok(Redirect::to(target).into_response());
    }
    let Some(identity) = state.identity else {
        return Ok(Redirect::to("/login").into_response());
    };

    let rooms = RoomResolver::resolve(session).await?;

    let body = fill_template(include_res!(str, "/pages/chat.html"), &[
        ("display_name", escape_html(&identity.display_name).as_str()),
        ("photo_url", escape_html(identity.photo_url.as_deref().unwrap_or("")).as_str()),
        ("room_id", escape_html(rooms.room()).as_str()),
    ]);

    Ok(Html(body).into_response())
}
