pub mod composer;
pub mod resolver;
pub mod sync;
pub mod view;

mod room;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::room))
        .route("/ws", get(ws::room_ws))
}
