use std::fmt;

use anyhow::anyhow;
use oauth2::{basic::BasicClient, AuthUrl, Client, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

type HappyClient = Client<oauth2::StandardErrorResponse<oauth2::basic::BasicErrorResponseType>, oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardTokenIntrospectionResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>, oauth2::StandardRevocableToken, oauth2::StandardErrorResponse<oauth2::RevocationErrorResponseType>, oauth2::EndpointSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointNotSet, oauth2::EndpointSet>;

const IDENTITY_TOOLKIT: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Google,
    Github,
}

impl ClientProvider {
    /// Firebase provider id.
    pub fn id(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google.com",
            Github => "github.com",
        }
    }

    fn path(&self) -> &str {
        use ClientProvider::*;
        match self {
            Google => "google",
            Github => "github",
        }
    }

    /// Scopes that make the provider hand over a display name and avatar.
    pub fn scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Google => &["openid", "profile"],
            Github => &["read:user"],
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Google => ("https://accounts.google.com/o/oauth2/auth", "https://oauth2.googleapis.com/token"),
            Github => ("https://github.com/login/oauth/authorize", "https://github.com/login/oauth/access_token"),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// OAuth clients per provider plus the Firebase key used to turn a provider
/// token into a Firebase identity.
#[derive(Clone)]
pub struct Clients {
    pub(crate) firebase_idpurl: String,
    firebase_apikey: String,
    google_client: Option<HappyClient>,
    github_client: Option<HappyClient>,
}

impl Clients {
    /// `public_url` is where the providers send the browser back to.
    pub fn from_json(json: &Value, public_url: &str) -> AppResult<Clients> {
        let firebase_apikey = json.get_obj_field("firebase")?.get_str_field("apikey")?;
        let firebase_idpurl = format!("{IDENTITY_TOOLKIT}?key={firebase_apikey}");

        let client = |provider: ClientProvider| -> AppResult<Option<HappyClient>> {
            let Some(json) = json.get(provider.path()) else {
                return Ok(None);
            };
            let client_id = ClientId::new(json.get_str_field("client_id")?);
            let client_secret = ClientSecret::new(json.get_str_field("client_secret")?);

            let (auth_url, token_url) = provider.endpoints();
            let auth_url = AuthUrl::new(auth_url.to_owned())?;
            let token_url = TokenUrl::new(token_url.to_owned())?;
            let redirect_url = RedirectUrl::new(format!("{public_url}/lockin/{}", provider.path()))?;

            Ok(Some(
                BasicClient::new(client_id)
                .set_client_secret(client_secret)
                .set_auth_uri(auth_url)
                .set_token_uri(token_url)
                .set_redirect_uri(redirect_url)
            ))
        };

        Ok(
            Clients {
                firebase_idpurl,
                google_client: client(ClientProvider::Google)?,
                github_client: client(ClientProvider::Github)?,
                firebase_apikey,
            }
        )
    }

    pub fn firebase_apikey(&self) -> &str {
        &self.firebase_apikey
    }

    pub fn get_client(&self, provider: ClientProvider) -> AppResult<HappyClient> {
        use ClientProvider::*;
        match provider {
            Google => self.google_client.clone(),
            Github => self.github_client.clone(),
        }.ok_or_else(|| anyhow!("OAuth provider {provider} keys not supplied").into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_configured_providers() {
        let clients = Clients::from_json(&json!({
            "firebase": { "apikey": "fb-key" },
            "google": { "client_id": "gid", "client_secret": "gsecret" },
        }), "http://localhost:8080").unwrap();

        assert_eq!(clients.firebase_apikey(), "fb-key");
        assert!(clients.firebase_idpurl.ends_with("accounts:signInWithIdp?key=fb-key"));

        let google = clients.get_client(ClientProvider::Google).unwrap();
        assert_eq!(
            google.redirect_uri().map(|url| url.as_str().to_owned()),
            Some("http://localhost:8080/lockin/google".to_owned())
        );
        assert!(clients.get_client(ClientProvider::Github).is_err());
    }

    #[test]
    fn firebase_key_is_required() {
        assert!(Clients::from_json(&json!({ "google": {} }), "http://localhost:8080").is_err());
    }

    #[test]
    fn providers_parse_from_paths() {
        let provider: ClientProvider = serde_json::from_value(json!("github")).unwrap();
        assert_eq!(provider, ClientProvider::Github);
        assert_eq!(provider.id(), "github.com");
    }
}
