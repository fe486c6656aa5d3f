use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt, TryStreamExt};
use log::debug;
use reqwest::header::{ACCEPT, LINK, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use crate::auth::{self, Challenge, Credentials};
use crate::config;
use crate::image::{ImageId, ImageInfo, ImageName, DOCKER_HUB};

const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// User name Google registries expect alongside an OAuth2 access token.
const GOOGLE_USER: &str = "oauth2accesstoken";

const TAG_PAGE_SIZE: usize = 1000;

const MANIFEST_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.oci.image.index.v1+json";

#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("authenticate: {0}")]
    Auth(#[from] auth::Error),

    #[error("{url}: code: {code}, body: {body}")]
    Response { url: String, code: u16, body: String },
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Known images of a repository, newest first. Unknown repositories have no images.
    async fn get_repository(&self, repository: &ImageName) -> Result<Vec<ImageInfo>, Error>;

    async fn image_exists(&self, image: &ImageId) -> Result<bool, Error>;
}

/// Orders images newest first. Images without a creation time go last, ordered
/// by tag with embedded numbers compared by value.
pub fn sort_newest_first(images: &mut [ImageInfo]) {
    images.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| compare_tags(b.id.tag(), a.id.tag()))
    });
}

/// Compares tags piece by piece, where a piece is a run of digits or of anything
/// else. Digit runs compare as numbers, so `9 < 10` and `1.9 < 1.10`.
pub fn compare_tags(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        let (piece_a, rest_a) = split_piece(a);
        let (piece_b, rest_b) = split_piece(b);
        let order = match (piece_a.parse::<u64>(), piece_b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| piece_a.len().cmp(&piece_b.len())),
            _ => piece_a.cmp(piece_b),
        };
        if order != Ordering::Equal {
            return order;
        }
        (a, b) = (rest_a, rest_b);
    }
}

fn split_piece(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    s.split_at(s.find(|c: char| c.is_ascii_digit() != digits).unwrap_or(s.len()))
}

/// The `rel="next"` target of a `Link` header.
fn next_link(header: &str) -> Option<&str> {
    header
        .split(',')
        .find(|link| link.contains(r#"rel="next""#))?
        .split_once('<')?
        .1
        .split_once('>')
        .map(|(target, _)| target)
}

/// Docker Registry HTTP API V2 client. Answers bearer token challenges, using
/// Google credentials for Google registries and the configured token elsewhere.
pub struct HttpRegistry {
    client: reqwest::Client,
    insecure_hosts: Vec<String>,
    google_hosts: Vec<String>,
    credentials: Option<Credentials>,
    concurrency: usize,
    /// Bearer tokens from earlier challenges, per repository.
    tokens: Mutex<HashMap<ImageName, String>>,
}

#[derive(Deserialize)]
struct TagList {
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ManifestConfig {
    digest: String,
}

#[derive(Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Deserialize)]
struct Descriptor {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Deserialize)]
struct Manifest {
    /// Absent for multi-architecture indexes.
    config: Option<ManifestConfig>,
    /// Per-platform manifests of an index.
    manifests: Option<Vec<Descriptor>>,
}

#[derive(Deserialize)]
struct ImageConfig {
    created: Option<DateTime<Utc>>,
}

/// The manifest whose creation time stands for a whole index: linux/amd64 when
/// present, else the first real platform. Attestations have platform `unknown`.
fn pick_platform(descriptors: &[Descriptor]) -> Option<&Descriptor> {
    let is = |d: &Descriptor, os: &str, arch: &str| {
        d.platform.as_ref().is_some_and(|p| p.os == os && p.architecture == arch)
    };
    descriptors
        .iter()
        .find(|d| is(d, "linux", "amd64"))
        .or_else(|| {
            descriptors
                .iter()
                .find(|d| d.platform.as_ref().map_or(true, |p| p.os != "unknown"))
        })
}

async fn decode<T: DeserializeOwned>(url: &str, resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    match (status.is_success(), serde_json::from_slice(&bytes)) {
        (true, Ok(value)) => Ok(value),
        _ => Err(Error::Response {
            url: url.to_string(),
            code: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).to_string(),
        }),
    }
}

impl HttpRegistry {
    pub fn new(cfg: &config::Registry, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            insecure_hosts: cfg.insecure_hosts.clone(),
            google_hosts: cfg.google_hosts.clone(),
            credentials: cfg.token().map(|password| Credentials {
                username: cfg.username.clone(),
                password,
            }),
            concurrency: cfg.concurrency.max(1),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, name: &ImageName, suffix: &str) -> String {
        let scheme = if self.insecure_hosts.iter().any(|h| h == name.host()) {
            "http"
        } else {
            "https"
        };
        let host = if name.host() == DOCKER_HUB {
            DOCKER_HUB_API
        } else {
            name.host()
        };
        format!("{scheme}://{host}/v2/{}/{suffix}", name.path())
    }

    fn is_google(&self, host: &str) -> bool {
        self.google_hosts.iter().any(|suffix| {
            host == suffix || host.ends_with(&format!(".{suffix}")) || host.ends_with(&format!("-{suffix}"))
        })
    }

    async fn credentials(&self, name: &ImageName) -> Result<Option<Credentials>, Error> {
        if self.is_google(name.host()) {
            return Ok(Some(Credentials {
                username: GOOGLE_USER.to_string(),
                password: auth::google_token().await?,
            }));
        }
        Ok(self.credentials.clone())
    }

    fn request(&self, method: Method, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url).header(ACCEPT, MANIFEST_TYPES);
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request for something in `name`, answering one authentication
    /// challenge if the registry turns it down.
    async fn send(&self, method: Method, name: &ImageName, url: &str) -> Result<reqwest::Response, Error> {
        let token = self.tokens.lock().await.get(name).cloned();
        let resp = self.request(method.clone(), url, token.as_deref()).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse);
        let retry = match challenge {
            Some(Challenge::Bearer { realm, service, scope }) => {
                let scope = scope.unwrap_or_else(|| format!("repository:{}:pull", name.path()));
                let credentials = self.credentials(name).await?;
                let token = auth::exchange(&self.client, &realm, service.as_deref(), &scope, credentials.as_ref()).await?;
                self.tokens.lock().await.insert(name.clone(), token.clone());
                self.request(method, url, Some(&token))
            }
            Some(Challenge::Basic) => match self.credentials(name).await? {
                Some(credentials) => self
                    .request(method, url, None)
                    .basic_auth(credentials.username, Some(credentials.password)),
                None => return Ok(resp),
            },
            None => return Ok(resp),
        };
        debug!("Retrying {url} with credentials");
        Ok(retry.send().await?)
    }

    /// GETs and decodes a JSON document. `None` when the registry answers 404.
    async fn get_json<T: DeserializeOwned>(&self, name: &ImageName, url: &str) -> Result<Option<T>, Error> {
        let resp = self.send(Method::GET, name, url).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(url, resp).await.map(Some)
    }

    /// Every tag, following the registry's pagination links.
    async fn tags(&self, repository: &ImageName) -> Result<Vec<String>, Error> {
        let mut tags = vec![];
        let mut next = Some(self.url(repository, &format!("tags/list?n={TAG_PAGE_SIZE}")));
        while let Some(url) = next.take() {
            let resp = self.send(Method::GET, repository, &url).await?;
            if resp.status() == StatusCode::NOT_FOUND {
                break;
            }
            next = resp
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_link)
                .and_then(|link| Url::parse(&url).ok()?.join(link).ok())
                .map(String::from);
            let page: TagList = decode(&url, resp).await?;
            tags.extend(page.tags.unwrap_or_default());
        }
        Ok(tags)
    }

    async fn created_at(&self, image: &ImageId) -> Result<Option<DateTime<Utc>>, Error> {
        let name = image.name();
        let manifest_url = self.url(name, &format!("manifests/{}", image.tag()));
        let Some(mut manifest) = self.get_json::<Manifest>(name, &manifest_url).await? else {
            return Ok(None);
        };
        let platform = manifest
            .manifests
            .as_deref()
            .and_then(pick_platform)
            .map(|descriptor| descriptor.digest.clone());
        if let Some(digest) = platform {
            let url = self.url(name, &format!("manifests/{digest}"));
            match self.get_json::<Manifest>(name, &url).await? {
                Some(resolved) => manifest = resolved,
                None => return Ok(None),
            }
        }
        let Some(config) = manifest.config else {
            return Ok(None);
        };
        let blob_url = self.url(name, &format!("blobs/{}", config.digest));
        Ok(self
            .get_json::<ImageConfig>(name, &blob_url)
            .await?
            .and_then(|config| config.created))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn get_repository(&self, repository: &ImageName) -> Result<Vec<ImageInfo>, Error> {
        debug!("Listing tags for {repository}");
        let tags = self.tags(repository).await?;
        let mut images: Vec<ImageInfo> = stream::iter(tags)
            .map(|tag| async move {
                let id = repository.with_tag(tag);
                let created_at = self.created_at(&id).await?;
                Ok::<_, Error>(ImageInfo::new(id, created_at))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        sort_newest_first(&mut images);
        debug!("{} images found for {repository}", images.len());
        Ok(images)
    }

    async fn image_exists(&self, image: &ImageId) -> Result<bool, Error> {
        let url = self.url(image.name(), &format!("manifests/{}", image.tag()));
        let resp = self.send(Method::HEAD, image.name(), &url).await?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::Response {
                url,
                code: status.as_u16(),
                body: String::new(),
            }),
        }
    }
}
