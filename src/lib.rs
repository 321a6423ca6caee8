pub mod appresult;
pub mod auth;
pub mod config;
pub mod index;
pub mod res;
pub mod rooms;
pub mod session;
pub mod store;

use anyhow::anyhow;
use axum::{extract::FromRef, routing::get, Router};
use serde_json::Value;

pub use appresult::{AppError, AppResult};

use session::SessionHub;
use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
    pub clients: auth::Clients,
    pub sessions: SessionHub,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index::index))
        .merge(auth::router())
        .nest("/chat", rooms::router())
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
    fn get_obj_field(&self, field: &str) -> AppResult<&Value>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or_else(|| anyhow!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }

    fn get_obj_field(&self, field: &str) -> AppResult<&Value> {
        Ok(
            self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))?
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::GetField;

    #[test]
    fn reads_nested_string_fields() {
        let body = json!({ "text": { "stringValue": "hi" } });

        let text = body.get_obj_field("text").unwrap().get_str_field("stringValue").unwrap();
        assert_eq!(text, "hi");
    }

    #[test]
    fn missing_or_mistyped_fields_are_errors() {
        let body = json!({ "count": 3 });

        assert!(body.get_obj_field("text").is_err());
        assert!(body.get_str_field("count").is_err());
    }
}
