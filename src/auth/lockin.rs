use anyhow::anyhow;
use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect}};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_sessions::Session;
use tracing::info;

use crate::{session::{return_target, Identity, SessionHub, CSRF_STATE, IDENTITY, PKCE_VERIFIER, RETURN_URL}, AppResult, AppState, GetField};

use super::{clients::ClientProvider, Clients};

const NAMELESS: &str = "Nameless User";

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

/// Reads the profile out of a `signInWithIdp` response.
pub(crate) fn identity_from_firebase(body: &Value) -> AppResult<Identity> {
    let display_name = body
        .get("displayName")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(NAMELESS)
        .to_owned();

    Ok(Identity {
        uid: body.get_str_field("localId")?,
        display_name,
        photo_url: body.get("photoUrl").and_then(Value::as_str).map(str::to_owned),
    })
}

#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(clients): State<Clients>,
    State(sessions): State<SessionHub>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or_else(|| anyhow!("OAuth: without state"))?);
    let code = AuthorizationCode::new(code.ok_or_else(|| anyhow!("OAuth: without code"))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(anyhow!("no csrf_state").into());
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err(anyhow!("csrf tokens don't match").into());
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(anyhow!("no pkce_verifier").into());
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.post(&clients.firebase_idpurl)
        .json(&FirebaseRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: "http://localhost/".to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let identity = identity_from_firebase(&body)?;
    session.insert(IDENTITY, &identity).await?;
    session.save().await?;
    if let Some(id) = session.id() {
        sessions.notify(&id.to_string(), Some(identity.clone()));
    }

    info!(user = %identity.uid, name = %identity.display_name, %provider, "signed in");

    let return_url = session.remove::<String>(RETURN_URL).await?;
    Ok(Redirect::to(&return_target(return_url, "/chat")))
}
