mod clients;
mod login;
mod lockin;
mod logout;

use axum::{routing::get, Router};

use crate::AppState;

pub use clients::{ClientProvider, Clients};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page))
        .route("/login/{provider}", get(login::login))
        .route("/lockin/{provider}", get(lockin::lockin))
        .route("/logout", get(logout::logout))
}
