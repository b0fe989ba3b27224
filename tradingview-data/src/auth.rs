use crate::error::Error;
use reqwest::{header, redirect::Policy};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Token sent by `set_auth_token` when no credentials are configured.
pub const ANONYMOUS_TOKEN: &str = "unauthorized_user_token";

const MAX_REDIRECTS: usize = 5;

/// Credentials used to authenticate the chart socket.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum Auth {
    #[default]
    Anonymous,
    /// Pre-resolved auth token.
    Token(String),
    /// Browser session cookies, resolved to a token over HTTP on connect.
    Session {
        session_id: String,
        signature: String,
    },
}

impl Auth {
    /// Resolve the token sent in `set_auth_token`.
    pub async fn resolve(&self, location: &str) -> Result<String, Error> {
        match self {
            Auth::Anonymous => Ok(ANONYMOUS_TOKEN.to_string()),
            Auth::Token(token) => Ok(token.clone()),
            Auth::Session {
                session_id,
                signature,
            } => fetch_auth_token(session_id, signature, location).await,
        }
    }
}

/// `Cookie` header value for a TradingView browser session.
pub fn auth_cookies(session_id: &str, signature: &str) -> String {
    if signature.is_empty() {
        format!("sessionid={session_id}")
    } else {
        format!("sessionid={session_id};sessionid_sign={signature}")
    }
}

/// Extract the value of the first `"auth_token":"…"` occurrence in a page body.
pub fn extract_auth_token(body: &str) -> Option<String> {
    const KEY: &str = r#""auth_token":""#;

    let start = body.find(KEY)? + KEY.len();
    let end = body[start..].find('"')?;
    let token = &body[start..start + end];

    (!token.is_empty()).then(|| token.to_string())
}

async fn fetch_auth_token(
    session_id: &str,
    signature: &str,
    location: &str,
) -> Result<String, Error> {
    let http = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()?;
    let cookies = auth_cookies(session_id, signature);

    let mut location =
        Url::parse(location).map_err(|error| Error::Auth(format!("invalid location: {error}")))?;

    for _ in 0..=MAX_REDIRECTS {
        let response = http
            .get(location.clone())
            .header(header::COOKIE, &cookies)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::Auth(format!("server error resolving session: {status}")));
        }

        if status.is_redirection() {
            let next = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| location.join(value).ok());

            match next {
                Some(next) if next != location => {
                    debug!(from = %location, to = %next, "following auth redirect");
                    location = next;
                    continue;
                }
                _ => {}
            }
        }

        let body = response.text().await?;
        return extract_auth_token(&body)
            .ok_or_else(|| Error::Auth("session is invalid or expired".to_string()));
    }

    Err(Error::Auth(format!(
        "exceeded {MAX_REDIRECTS} redirects resolving session"
    )))
}
