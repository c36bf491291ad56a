use once_cell::sync::Lazy;
use reqwest::Url;
use std::{env, time::Duration};
use thiserror::Error;

pub static LOGIN_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_LOGIN_URL").unwrap_or_else(|_| "https://login.bolha.com/auth.php".to_string())
});

pub static LOGIN_FAILED_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_LOGIN_FAILED_URL").unwrap_or_else(|_| "https://login.bolha.com/".to_string())
});

pub static SITE_URL: Lazy<String> =
    Lazy::new(|| env::var("BOLHA_SITE_URL").unwrap_or_else(|_| "http://www.bolha.com/".to_string()));

pub static LISTINGS_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_LISTINGS_URL").unwrap_or_else(|_| "https://moja.bolha.com/oglasi".to_string())
});

pub static REMOVE_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_REMOVE_URL")
        .unwrap_or_else(|_| "https://moja.bolha.com/adManager/ajaxRemoveActiveBulk".to_string())
});

pub static CATEGORY_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_CATEGORY_URL")
        .unwrap_or_else(|_| "http://objava-oglasa.bolha.com/izbor_paketa.php".to_string())
});

pub static PUBLISH_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOLHA_PUBLISH_URL")
        .unwrap_or_else(|_| "http://objava-oglasa.bolha.com/oddaj.php".to_string())
});

#[derive(Debug, Error)]
#[error("invalid endpoint url `{name}`: {message}")]
pub struct EndpointError {
    name: &'static str,
    message: String,
}

/// Remote endpoints touched by one session.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub login: Url,
    pub login_failed: Url,
    pub site: Url,
    pub listings: Url,
    pub remove: Url,
    pub category: Url,
    pub publish: Url,
}

impl Endpoints {
    pub fn from_env() -> Result<Self, EndpointError> {
        Ok(Self {
            login: parse("login", &LOGIN_URL)?,
            login_failed: parse("login_failed", &LOGIN_FAILED_URL)?,
            site: parse("site", &SITE_URL)?,
            listings: parse("listings", &LISTINGS_URL)?,
            remove: parse("remove", &REMOVE_URL)?,
            category: parse("category", &CATEGORY_URL)?,
            publish: parse("publish", &PUBLISH_URL)?,
        })
    }

    /// Every endpoint under one origin, using the platform's paths.
    #[cfg(test)]
    pub fn with_base(base: &Url) -> Self {
        let join = |path: &str| base.join(path).expect("static path joins");
        Self {
            login: join("/auth.php"),
            login_failed: join("/login-failed"),
            site: join("/"),
            listings: join("/oglasi"),
            remove: join("/adManager/ajaxRemoveActiveBulk"),
            category: join("/izbor_paketa.php"),
            publish: join("/oddaj.php"),
        }
    }
}

fn parse(name: &'static str, raw: &str) -> Result<Url, EndpointError> {
    Url::parse(raw).map_err(|err| EndpointError {
        name,
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS").unwrap_or(180)),
            connect_timeout: Duration::from_secs(env_u64("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(10)),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub fn batch_max_concurrency() -> Option<usize> {
    env::var("BATCH_MAX_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
