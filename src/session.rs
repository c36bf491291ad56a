use crate::config::{Endpoints, HttpSettings};
use crate::form::{self, FormError, PublishForm};
use crate::http::{BASE_HEADERS, HeaderError, Redirects, Transport, host_header, merge_headers, origin};
use crate::models::{Account, AdDraft, ListingId, PublishReport, StageReport};
use crate::tokens::{TokenError, TokenExtractor, TokenSet, platform_extractor};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url, header::LOCATION};
use serde_json::{Value, json};
use std::{collections::HashSet, future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use urlencoding::encode;

static LISTING_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"id="ad_(\d+)"#).expect("listing id pattern compiles"));

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login rejected for `{username}`")]
    Auth { username: String },
    #[error("category {category_id}: {source}")]
    IncompleteTokenSet {
        category_id: String,
        #[source]
        source: TokenError,
    },
    #[error("{0}")]
    ImageRead(String),
    #[error("bulk removal failed with HTTP {status}")]
    Removal { status: u16 },
    #[error("account has no active listings")]
    NoListingsFound,
    #[error("ad not published: {0}")]
    Publish(String),
    #[error("request `{endpoint}` failed: {message}")]
    Network {
        endpoint: &'static str,
        message: String,
    },
    #[error("cannot build request: {0}")]
    InvalidRequest(String),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Auth { .. } => "auth",
            SessionError::IncompleteTokenSet { .. } => "incomplete_token_set",
            SessionError::ImageRead(_) => "image_read",
            SessionError::Removal { .. } => "removal",
            SessionError::NoListingsFound => "no_listings_found",
            SessionError::Publish(_) => "publish",
            SessionError::Network { .. } => "network",
            SessionError::InvalidRequest(_) => "invalid_request",
        }
    }

    fn network(endpoint: &'static str, err: reqwest::Error) -> Self {
        SessionError::Network {
            endpoint,
            message: err.to_string(),
        }
    }
}

impl From<HeaderError> for SessionError {
    fn from(value: HeaderError) -> Self {
        SessionError::InvalidRequest(value.to_string())
    }
}

impl From<FormError> for SessionError {
    fn from(value: FormError) -> Self {
        match value {
            FormError::ImageRead { .. } => SessionError::ImageRead(value.to_string()),
            FormError::InvalidPart { .. } => SessionError::InvalidRequest(value.to_string()),
        }
    }
}

/// Steps of one publish, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    CategorySelected,
    TokensExtracted,
    ImagesUploaded,
    Submitted,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::CategorySelected => "select_category",
            PublishStage::TokensExtracted => "extract_tokens",
            PublishStage::ImagesUploaded => "attach_images",
            PublishStage::Submitted => "submit",
        }
    }
}

struct StageOutcome<T> {
    value: T,
    output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

/// Settings shared by every session of a batch. Holds no connection state.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoints: Arc<Endpoints>,
    pub http: HttpSettings,
    pub extractor: Arc<dyn TokenExtractor>,
}

impl SessionConfig {
    pub fn new(endpoints: Endpoints, http: HttpSettings) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            http,
            extractor: platform_extractor(),
        }
    }
}

/// An authenticated session for exactly one account. Owns its cookie jar; a
/// value of this type only exists after a successful login.
pub struct SessionClient {
    account: Account,
    endpoints: Arc<Endpoints>,
    transport: Transport,
    extractor: Arc<dyn TokenExtractor>,
}

impl SessionClient {
    pub async fn login(account: Account, config: &SessionConfig) -> Result<Self, SessionError> {
        let transport = Transport::new(config.http)
            .map_err(|err| SessionError::InvalidRequest(err.to_string()))?;
        let client = Self {
            account,
            endpoints: config.endpoints.clone(),
            transport,
            extractor: config.extractor.clone(),
        };
        client.authenticate().await?;
        Ok(client)
    }

    pub fn username(&self) -> &str {
        &self.account.username
    }

    async fn authenticate(&self) -> Result<(), SessionError> {
        let url = &self.endpoints.login;
        let site = &self.endpoints.site;
        let headers = merge_headers(
            BASE_HEADERS,
            &[
                ("Content-Type", FORM_CONTENT_TYPE.to_string()),
                ("Host", host_header(url)),
                ("Origin", origin(site)),
                ("Referer", site.to_string()),
                ("Upgrade-Insecure-Requests", "1".to_string()),
                ("X-Requested-With", "XMLHttpRequest".to_string()),
                ("X-Site", site.to_string()),
            ],
        )?;
        let request = self
            .request(Method::POST, url, Redirects::Suppress)
            .headers(headers)
            .form(&form::login_form(&self.account));
        let response = send("login", request).await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || self.redirects_to_login_failure(&response) {
            warn!(
                target = "bolha.session",
                username = %self.account.username,
                status = status.as_u16(),
                "login_rejected"
            );
            return Err(SessionError::Auth {
                username: self.account.username.clone(),
            });
        }
        info!(target = "bolha.session", username = %self.account.username, "logged_in");
        Ok(())
    }

    fn redirects_to_login_failure(&self, response: &Response) -> bool {
        response.status().is_redirection()
            && location(response).as_ref() == Some(&self.endpoints.login_failed)
    }

    /// Ids of every listing shown on the account page, in page order.
    pub async fn list_active_listing_ids(&self) -> Result<Vec<ListingId>, SessionError> {
        let url = &self.endpoints.listings;
        let headers = merge_headers(
            BASE_HEADERS,
            &[
                ("Host", host_header(url)),
                ("Upgrade-Insecure-Requests", "1".to_string()),
            ],
        )?;
        let request = self
            .request(Method::GET, url, Redirects::Suppress)
            .headers(headers);
        let response = send("listings", request).await?;
        if !response.status().is_success() {
            return Err(SessionError::Network {
                endpoint: "listings",
                message: format!("HTTP {}", response.status()),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| SessionError::network("listings", err))?;

        let ids = scrape_listing_ids(&body);
        if ids.is_empty() {
            return Err(SessionError::NoListingsFound);
        }
        debug!(target = "bolha.session", username = %self.account.username, count = ids.len(), "listings_found");
        Ok(ids)
    }

    pub async fn remove_listings(&self, ids: &[ListingId]) -> Result<(), SessionError> {
        if ids.is_empty() {
            return Ok(());
        }
        info!(
            target = "bolha.session",
            username = %self.account.username,
            count = ids.len(),
            "removing_listings"
        );
        let url = &self.endpoints.remove;
        let headers = merge_headers(
            BASE_HEADERS,
            &[
                ("Content-Type", FORM_CONTENT_TYPE.to_string()),
                ("Host", host_header(url)),
                ("Origin", origin(url)),
                ("Referer", self.endpoints.listings.to_string()),
                ("Upgrade-Insecure-Requests", "1".to_string()),
                ("X-Requested-With", "XMLHttpRequest".to_string()),
            ],
        )?;
        let request = self
            .request(Method::POST, url, Redirects::Suppress)
            .headers(headers)
            .form(&form::removal_form(ids));
        let response = send("remove", request).await?;
        if response.status() != StatusCode::OK {
            return Err(SessionError::Removal {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Removes every active listing. An empty account counts as zero removed.
    pub async fn clear_listings(&self) -> Result<usize, SessionError> {
        let ids = match self.list_active_listing_ids().await {
            Ok(ids) => ids,
            Err(SessionError::NoListingsFound) => return Ok(0),
            Err(err) => return Err(err),
        };
        self.remove_listings(&ids).await?;
        Ok(ids.len())
    }

    /// Runs the publish workflow for one ad. Any failing step aborts the ad.
    pub async fn publish(&self, ad: &AdDraft) -> Result<PublishReport, SessionError> {
        info!(
            target = "bolha.session",
            username = %self.account.username,
            category_id = %ad.category_id,
            title = %ad.title,
            "publishing_ad"
        );
        let mut stages = Vec::new();

        let page = capture_stage(
            PublishStage::CategorySelected,
            &mut stages,
            self.select_category(ad),
        )
        .await?;

        let tokens = capture_stage(PublishStage::TokensExtracted, &mut stages, async {
            self.extract_tokens(ad, &page)
        })
        .await?;

        let form = capture_stage(
            PublishStage::ImagesUploaded,
            &mut stages,
            attach_images(&tokens, ad),
        )
        .await?;

        let listing_id =
            capture_stage(PublishStage::Submitted, &mut stages, self.submit(ad, form)).await?;

        info!(
            target = "bolha.session",
            username = %self.account.username,
            listing_id = %listing_id,
            "ad_published"
        );
        Ok(PublishReport { listing_id, stages })
    }

    // The only request that follows redirects: choosing a category lands on the
    // token-bearing form page.
    async fn select_category(&self, ad: &AdDraft) -> Result<StageOutcome<Vec<u8>>, SessionError> {
        let url = &self.endpoints.category;
        let mut referer = url.clone();
        referer.set_path("/");
        referer.set_query(None);
        let headers = merge_headers(
            BASE_HEADERS,
            &[
                ("Content-Type", FORM_CONTENT_TYPE.to_string()),
                ("Host", host_header(url)),
                ("Origin", origin(url)),
                ("Referer", referer.to_string()),
                ("Upgrade-Insecure-Requests", "1".to_string()),
            ],
        )?;
        let request = self
            .request(Method::POST, url, Redirects::Follow)
            .headers(headers)
            .form(&form::category_form(&ad.category_id));
        let response = send("category", request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Publish(format!(
                "category selection returned HTTP {status}"
            )));
        }
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| SessionError::network("category", err))?;
        Ok(StageOutcome::new(
            body.to_vec(),
            json!({
                "category_id": ad.category_id,
                "final_url": final_url,
                "bytes": body.len(),
            }),
        ))
    }

    fn extract_tokens(
        &self,
        ad: &AdDraft,
        page: &[u8],
    ) -> Result<StageOutcome<TokenSet>, SessionError> {
        let tokens = self
            .extractor
            .extract(page)
            .map_err(|source| SessionError::IncompleteTokenSet {
                category_id: ad.category_id.clone(),
                source,
            })?;
        let fields = tokens.len();
        debug!(
            target = "bolha.session",
            username = %self.account.username,
            uploader_id = tokens.get("uploader_id").unwrap_or_default(),
            fields,
            "tokens_extracted"
        );
        Ok(StageOutcome::new(tokens, json!({ "fields": fields })))
    }

    async fn submit(
        &self,
        ad: &AdDraft,
        form: PublishForm,
    ) -> Result<StageOutcome<ListingId>, SessionError> {
        let url = &self.endpoints.publish;
        let mut referer = url.clone();
        referer.set_query(Some(&format!("katid={}&days=30", encode(&ad.category_id))));
        let headers = merge_headers(
            BASE_HEADERS,
            &[
                ("Host", host_header(url)),
                ("Origin", origin(url)),
                ("Referer", referer.to_string()),
                ("Upgrade-Insecure-Requests", "1".to_string()),
            ],
        )?;
        let request = self
            .request(Method::POST, url, Redirects::Suppress)
            .headers(headers)
            .multipart(form.into_multipart()?);
        let response = send("publish", request).await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(SessionError::Publish(format!("HTTP {status}")));
        }
        let target = location(&response);
        let listing_id = target
            .as_ref()
            .and_then(listing_id_from)
            .ok_or_else(|| SessionError::Publish("response carried no listing id".into()))?;
        Ok(StageOutcome::new(
            listing_id,
            json!({
                "status": status.as_u16(),
                "location": target.map(|url| url.to_string()),
            }),
        ))
    }

    fn request(&self, method: Method, url: &Url, redirects: Redirects) -> RequestBuilder {
        self.transport
            .client(redirects)
            .request(method, url.clone())
    }
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response, SessionError> {
    let response = request
        .send()
        .await
        .map_err(|err| SessionError::network(endpoint, err))?;
    crate::metrics::request_sent(endpoint, response.status().as_u16());
    Ok(response)
}

async fn attach_images(
    tokens: &TokenSet,
    ad: &AdDraft,
) -> Result<StageOutcome<PublishForm>, SessionError> {
    let mut form = PublishForm::with_fields(tokens, ad);
    let images = form.attach_images(&ad.images).await?;
    let file_parts = form.image_parts().count();
    Ok(StageOutcome::new(
        form,
        json!({ "images": images, "file_parts": file_parts }),
    ))
}

async fn capture_stage<T, Fut>(
    stage: PublishStage,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, SessionError>
where
    Fut: Future<Output = Result<StageOutcome<T>, SessionError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    let elapsed_ms = started.elapsed().as_millis();
    debug!(
        target = "bolha.session",
        stage = stage.as_str(),
        elapsed_ms = elapsed_ms as u64,
        "stage_finished"
    );
    stages.push(StageReport::new(stage.as_str(), elapsed_ms, outcome.output));
    Ok(outcome.value)
}

/// `Location` header resolved against the request URL.
fn location(response: &Response) -> Option<Url> {
    let raw = response.headers().get(LOCATION)?.to_str().ok()?;
    response.url().join(raw).ok()
}

fn listing_id_from(url: &Url) -> Option<ListingId> {
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(ListingId::new)
}

fn scrape_listing_ids(body: &[u8]) -> Vec<ListingId> {
    let mut seen = HashSet::new();
    LISTING_ID
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .filter(|id| seen.insert(id.clone()))
        .map(ListingId::new)
        .collect()
}
