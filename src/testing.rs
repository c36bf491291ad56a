//! In-process stand-in for the classifieds platform, used by the session and
//! batch tests. Accounts log in with password `secret`; `wrong` answers 401 and
//! `bounce` redirects to the login-failure page.

use crate::config::{Endpoints, HttpSettings};
use crate::session::SessionConfig;
use crate::tokens::{PLATFORM_FIELDS, render_token_page};
use axum::{
    Form, Router,
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use reqwest::Url;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Category whose form page omits one hidden field.
pub const BROKEN_CATEGORY: &str = "999";
/// Account whose bulk removal answers 500.
pub const STUCK_ACCOUNT: &str = "stuck";
/// Ad title the publish endpoint accepts without assigning an id.
pub const SILENT_TITLE: &str = "silent";

#[derive(Debug, Clone)]
pub struct Submission {
    pub username: String,
    pub referer: Option<String>,
    pub fields: Vec<(String, String)>,
    pub images: Vec<(String, String, Vec<u8>)>,
}

impl Submission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
pub struct PlatformState {
    pub log: Mutex<Vec<String>>,
    pub listings: Mutex<HashMap<String, Vec<String>>>,
    pub removals: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub submissions: Mutex<Vec<Submission>>,
    pub login_headers: Mutex<Vec<HeaderMap>>,
    /// Highest number of logins seen in progress at once.
    pub peak_logins: AtomicUsize,
    logins_in_flight: AtomicUsize,
    login_delay_ms: AtomicU64,
    next_id: AtomicU64,
}

impl PlatformState {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn log_for(&self, username: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| entry.split(':').nth(1) == Some(username))
            .collect()
    }

    pub fn peak_logins(&self) -> usize {
        self.peak_logins.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

pub struct FakePlatform {
    pub base: Url,
    pub state: Arc<PlatformState>,
}

impl FakePlatform {
    pub async fn spawn() -> Self {
        let state = Arc::new(PlatformState::default());
        state.next_id.store(5000, Ordering::SeqCst);
        let app = Router::new()
            .route("/auth.php", post(login))
            .route("/oglasi", get(listings))
            .route("/adManager/ajaxRemoveActiveBulk", post(remove))
            .route("/izbor_paketa.php", post(select_category))
            .route("/oddaj.php", get(form_page).post(submit))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake platform");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake platform");
        });
        Self {
            base: Url::parse(&format!("http://{addr}")).expect("base url"),
            state,
        }
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(Endpoints::with_base(&self.base), HttpSettings::default())
    }

    /// Holds every login response back so overlapping sessions become visible.
    pub fn slow_logins(&self, delay: Duration) {
        self.state
            .login_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn seed_listings(&self, username: &str, ids: &[&str]) {
        self.state.listings.lock().unwrap().insert(
            username.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
    }
}

fn session_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| pair.trim().strip_prefix("sid=").map(str::to_string))
}

async fn login(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let username = form.get("username").cloned().unwrap_or_default();
    state.record(format!("login:{username}"));
    state.login_headers.lock().unwrap().push(headers);

    let in_flight = state.logins_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_logins.fetch_max(in_flight, Ordering::SeqCst);
    let delay = state.login_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    state.logins_in_flight.fetch_sub(1, Ordering::SeqCst);

    match form.get("password").map(String::as_str) {
        Some("secret") => (
            StatusCode::FOUND,
            [
                (header::LOCATION, "/".to_string()),
                (header::SET_COOKIE, format!("sid={username}; Path=/")),
            ],
        )
            .into_response(),
        Some("bounce") => {
            (StatusCode::FOUND, [(header::LOCATION, "/login-failed".to_string())]).into_response()
        }
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn listings(State(state): State<Arc<PlatformState>>, headers: HeaderMap) -> Response {
    let Some(username) = session_user(&headers) else {
        return (StatusCode::FOUND, [(header::LOCATION, "/auth.php".to_string())]).into_response();
    };
    state.record(format!("listings:{username}"));
    let ids = state
        .listings
        .lock()
        .unwrap()
        .get(&username)
        .cloned()
        .unwrap_or_default();
    let mut page = String::from("<ul class=\"ads\">");
    for id in ids {
        page.push_str(&format!("<li id=\"ad_{id}\"><a href=\"/oglas/{id}\">{id}</a></li>"));
    }
    page.push_str("</ul>");
    Html(page).into_response()
}

async fn remove(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let username = session_user(&headers).unwrap_or_default();
    let ids = form.get("IDS").cloned().unwrap_or_default();
    state.record(format!("remove:{username}:{ids}"));
    state.removals.lock().unwrap().push((username.clone(), form));
    if username == STUCK_ACCOUNT {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    state.listings.lock().unwrap().remove(&username);
    StatusCode::OK.into_response()
}

async fn select_category(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let username = session_user(&headers).unwrap_or_default();
    let category = form.get("categoryId").cloned().unwrap_or_default();
    state.record(format!("category:{username}:{category}"));
    (
        StatusCode::FOUND,
        [(
            header::LOCATION,
            format!("/oddaj.php?katid={category}&days=30"),
        )],
    )
        .into_response()
}

async fn form_page(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(username) = session_user(&headers) else {
        return Html("<form action=\"/auth.php\"></form>".to_string()).into_response();
    };
    let category = query.get("katid").cloned().unwrap_or_default();
    state.record(format!("form:{username}:{category}"));
    let mut page = render_token_page(|name| format!("{name}-{category}"));
    if category == BROKEN_CATEGORY {
        if let Some((name, pattern)) = PLATFORM_FIELDS
            .iter()
            .find(|(name, _)| *name == "uploader_id")
        {
            page = page.replace(&pattern.replace("(.*?)", &format!("{name}-{category}")), "");
        }
    }
    Html(page).into_response()
}

async fn submit(
    State(state): State<Arc<PlatformState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let username = session_user(&headers).unwrap_or_default();
    state.record(format!("submit:{username}"));
    let mut submission = Submission {
        username,
        referer: headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        fields: Vec::new(),
        images: Vec::new(),
    };
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default().to_vec();
        if name.starts_with("aSlikeUpload[") {
            submission.images.push((name, file_name, bytes));
        } else {
            submission
                .fields
                .push((name, String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
    let silent = submission.field("cNaziv") == Some(SILENT_TITLE);
    state.submissions.lock().unwrap().push(submission);
    if silent {
        return Html("<p>Hvala!</p>".to_string()).into_response();
    }
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/moji-oglasi?status=ok&id={id}"))],
    )
        .into_response()
}
