use axum::{debug_handler, response::Redirect};

#[debug_handler]
pub async fn index() -> Redirect {
    Redirect::to("/chat")
}
