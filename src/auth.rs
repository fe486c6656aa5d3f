use std::collections::BTreeMap;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("auth error: {0}")]
    AuthError(#[from] google_cloud_auth::error::Error),

    #[error("auth token error: {0}")]
    AuthTokenError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("token from {realm}: code: {code}, body: {body}")]
    TokenResponse { realm: String, code: u16, body: String },
}

/// How a registry wants to be authenticated, from its `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut params = parse_params(params);
        Some(Challenge::Bearer {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Parses `key="value",other=value` pairs. Quoted values may contain commas.
fn parse_params(s: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut rest = s.trim();
    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => after.split_at(after.find(',').unwrap_or(after.len())),
        };
        params.insert(key, value.to_string());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

/// Username and password presented to a registry or its token service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Trades `credentials`, or nothing for anonymous pulls, for a bearer token
/// valid for `scope` at the token service in a registry's challenge.
pub async fn exchange(
    client: &reqwest::Client,
    realm: &str,
    service: Option<&str>,
    scope: &str,
    credentials: Option<&Credentials>,
) -> Result<String, Error> {
    debug!("Requesting registry token from {realm} for {scope}");
    let mut query = vec![("scope", scope)];
    if let Some(service) = service {
        query.push(("service", service));
    }
    let mut request = client.get(realm).query(&query);
    if let Some(credentials) = credentials {
        request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    let resp = request.send().await?;
    let status = resp.status();
    let bytes = resp.bytes().await?;

    match (status.is_success(), serde_json::from_slice(&bytes)) {
        (true, Ok(TokenResponse { token: Some(token), .. }))
        | (true, Ok(TokenResponse { access_token: Some(token), .. })) => Ok(token),
        _ => Err(Error::TokenResponse {
            realm: realm.to_string(),
            code: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).to_string(),
        }),
    }
}

/// An OAuth2 access token from the ambient Google credentials, accepted by
/// Artifact Registry as the password of the `oauth2accesstoken` user.
pub async fn google_token() -> Result<String, Error> {
    debug!("Exchanging Google credentials for an oauth2 token");

    use google_cloud_auth::{project::Config, token::DefaultTokenSourceProvider};
    use google_cloud_token::TokenSourceProvider as _;

    let audience = "https://oauth2.googleapis.com/token/";
    let scopes = ["https://www.googleapis.com/auth/cloud-platform"];

    let config = Config::default().with_audience(audience).with_scopes(&scopes);
    let tsp = DefaultTokenSourceProvider::new(config).await?;
    let token = tsp.token_source().token().await?;
    Ok(token.strip_prefix("Bearer ").unwrap_or(&token).to_string())
}
