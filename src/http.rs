use crate::config::HttpSettings;
use reqwest::{
    Client, Url,
    cookie::Jar,
    header::{HeaderMap, HeaderName, HeaderValue},
    redirect::Policy,
};
use std::sync::Arc;
use thiserror::Error;

/// Headers a desktop browser sends on every request to the platform.
pub const BASE_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json, text/javascript, */*; q=0.01"),
    ("Accept-Encoding", "identity"),
    ("Accept-Language", "en-US,en;q=0.9,sl;q=0.8,hr;q=0.7"),
    ("Cache-Control", "max-age=0"),
    ("Connection", "keep-alive"),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/66.0.3359.139 Safari/537.36",
    ),
];

#[derive(Debug, Error)]
#[error("invalid header `{name}`: {message}")]
pub struct HeaderError {
    name: String,
    message: String,
}

/// Redirect handling for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    Follow,
    Suppress,
}

/// Two clients over one cookie jar: one that hands back 3xx responses as-is and
/// one that follows them. Never shared between accounts.
pub struct Transport {
    direct: Client,
    following: Client,
}

impl Transport {
    pub fn new(settings: HttpSettings) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            direct: build_client(settings, jar.clone(), Policy::none())?,
            following: build_client(settings, jar, Policy::limited(10))?,
        })
    }

    pub fn client(&self, redirects: Redirects) -> &Client {
        match redirects {
            Redirects::Follow => &self.following,
            Redirects::Suppress => &self.direct,
        }
    }
}

fn build_client(
    settings: HttpSettings,
    jar: Arc<Jar>,
    policy: Policy,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .cookie_provider(jar)
        .redirect(policy)
        .build()
}

/// Baseline headers with per-endpoint overrides applied on top. Built fresh for
/// every request.
pub fn merge_headers(
    base: &[(&str, &str)],
    overrides: &[(&str, String)],
) -> Result<HeaderMap, HeaderError> {
    let mut headers = HeaderMap::with_capacity(base.len() + overrides.len());
    let pairs = base
        .iter()
        .map(|(name, value)| (*name, *value))
        .chain(overrides.iter().map(|(name, value)| (*name, value.as_str())));
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| HeaderError {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| HeaderError {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// `Host` header value for a URL, port included when it is not the default.
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

pub fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}
