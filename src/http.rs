#![cfg(not(tarpaulin_include))]
//! HTTP row store: an axum server in front of a file-backed
//! [`MemoryRowStore`] and a reqwest client implementing [`RowStore`]
//! against it.
//!
//! Every `/api` call is scoped to the owner of the `session` cookie; the
//! owner is never taken from the URL.

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use log::{error, info};
use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::identity::AuthenticatedUser;
use crate::login::{self, AuthError, UserCredentials, UserDirectory};
use crate::remote::{MemoryRowStore, RemoteRow, RowStore};
use crate::storage::EntityKind;

const SESSION_COOKIE: &str = "session";

lazy_static! {
    static ref SESSION_COOKIE_RE: Regex = Regex::new(r"(?:^|;\s*)session=([^;]+)").unwrap();
}

pub struct ServerState {
    pub rows: Arc<MemoryRowStore>,
    pub users: UserDirectory,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    user_id: String,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/auth/signup", post(handle_signup))
        .route("/auth/login", post(handle_login))
        .route("/auth/logout", post(handle_logout))
        .route("/api/:kind", get(fetch_rows).put(replace_rows))
        .route("/api/:kind/:id", put(update_row).delete(delete_row))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState {
        rows: Arc::new(MemoryRowStore::open(&config.data_dir)?),
        users: UserDirectory::open(&config.data_dir)?,
    });
    let app = router(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_signup(
    State(state): State<Arc<ServerState>>,
    Json(credentials): Json<UserCredentials>,
) -> Response {
    match state.users.register_user(
        &credentials.username,
        &credentials.email,
        &credentials.password,
    ) {
        Ok(user) => (
            StatusCode::CREATED,
            Json(LoginResponse { user_id: user.id }),
        )
            .into_response(),
        Err(AuthError::Database(e)) => {
            error!("signup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(AuthError::Hashing) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn handle_login(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Response {
    match state
        .users
        .verify_user(&credentials.username, &credentials.password)
    {
        Ok(Some(user)) => {
            let session_id = login::create_session(&user.id);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true);
            (jar.add(cookie), Json(LoginResponse { user_id: user.id })).into_response()
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response(),
        Err(e) => {
            error!("login failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response()
        }
    }
}

async fn handle_logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        login::end_session(cookie.value());
    }
    (jar.remove(Cookie::from(SESSION_COOKIE)), StatusCode::NO_CONTENT)
}

fn session_owner(jar: &CookieJar) -> Result<String, StatusCode> {
    jar.get(SESSION_COOKIE)
        .and_then(|c| login::validate_session(c.value()))
        .ok_or(StatusCode::UNAUTHORIZED)
}

fn entity_kind(name: &str) -> Result<EntityKind, StatusCode> {
    EntityKind::from_name(name).ok_or(StatusCode::NOT_FOUND)
}

fn internal(e: StoreError) -> StatusCode {
    error!("row store error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn fetch_rows(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Path(kind): Path<String>,
) -> Result<Json<Vec<RemoteRow>>, StatusCode> {
    let owner = session_owner(&jar)?;
    let kind = entity_kind(&kind)?;
    let rows = state.rows.fetch_all(kind, &owner).await.map_err(internal)?;
    Ok(Json(rows))
}

async fn replace_rows(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Path(kind): Path<String>,
    Json(rows): Json<Vec<RemoteRow>>,
) -> Result<StatusCode, StatusCode> {
    let owner = session_owner(&jar)?;
    let kind = entity_kind(&kind)?;
    // Rows always belong to the session owner, whatever the body claims.
    let rows = rows
        .into_iter()
        .map(|row| RemoteRow {
            owner_id: owner.clone(),
            ..row
        })
        .collect();
    state
        .rows
        .replace_all(kind, &owner, rows)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_row(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Path((kind, id)): Path<(String, String)>,
    Json(row): Json<RemoteRow>,
) -> Result<StatusCode, StatusCode> {
    let owner = session_owner(&jar)?;
    let kind = entity_kind(&kind)?;
    let row = RemoteRow {
        id,
        owner_id: owner.clone(),
        ..row
    };
    match state.rows.update_by_id(kind, &owner, row).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(internal(e)),
    }
}

async fn delete_row(
    State(state): State<Arc<ServerState>>,
    jar: CookieJar,
    Path((kind, id)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let owner = session_owner(&jar)?;
    let kind = entity_kind(&kind)?;
    match state.rows.delete_by_id(kind, &owner, &id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(internal(e)),
    }
}

/// [`RowStore`] backed by a remote server session.
pub struct HttpRowStore {
    client: reqwest::Client,
    base_url: String,
    session: String,
    user: AuthenticatedUser,
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

fn check(response: reqwest::Response) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(StoreError::Unauthorized);
    }
    if !status.is_success() {
        return Err(StoreError::Status(status.as_u16()));
    }
    Ok(response)
}

impl HttpRowStore {
    pub async fn signup(
        base_url: &str,
        username: &str,
        email: &str,
        password: &str,
    ) -> StoreResult<AuthenticatedUser> {
        let response = reqwest::Client::new()
            .post(format!("{}/auth/signup", base_url.trim_end_matches('/')))
            .json(&UserCredentials {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;
        let body: LoginResponse = check(response)?.json().await.map_err(transport)?;
        Ok(AuthenticatedUser { id: body.user_id })
    }

    /// Sign in and keep the session for later requests.
    pub async fn login(base_url: &str, username: &str, password: &str) -> StoreResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{}/auth/login", base_url))
            .json(&UserCredentials {
                username: username.to_string(),
                email: String::new(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;
        let response = check(response)?;
        let session = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| SESSION_COOKIE_RE.captures(v).map(|c| c[1].to_string()))
            .ok_or(StoreError::Unauthorized)?;
        let body: LoginResponse = response.json().await.map_err(transport)?;
        info!("signed in to {} as {}", base_url, body.user_id);
        Ok(HttpRowStore {
            client,
            base_url,
            session,
            user: AuthenticatedUser { id: body.user_id },
        })
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    fn url(&self, kind: EntityKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/api/{}/{}", self.base_url, kind.as_str(), id),
            None => format!("{}/api/{}", self.base_url, kind.as_str()),
        }
    }

    fn cookie(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.session)
    }

    fn ensure_owner(&self, owner: &str) -> StoreResult<()> {
        if owner != self.user.id {
            return Err(StoreError::Unauthorized);
        }
        Ok(())
    }

    /// `Ok(false)` for 404, the rest as usual.
    async fn send_found(&self, request: reqwest::RequestBuilder) -> StoreResult<bool> {
        let response = request
            .header(COOKIE, self.cookie())
            .send()
            .await
            .map_err(transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response)?;
        Ok(true)
    }
}

#[async_trait]
impl RowStore for HttpRowStore {
    async fn fetch_all(&self, kind: EntityKind, owner: &str) -> StoreResult<Vec<RemoteRow>> {
        self.ensure_owner(owner)?;
        let response = self
            .client
            .get(self.url(kind, None))
            .header(COOKIE, self.cookie())
            .send()
            .await
            .map_err(transport)?;
        check(response)?.json().await.map_err(transport)
    }

    async fn replace_all(
        &self,
        kind: EntityKind,
        owner: &str,
        rows: Vec<RemoteRow>,
    ) -> StoreResult<()> {
        self.ensure_owner(owner)?;
        let response = self
            .client
            .put(self.url(kind, None))
            .header(COOKIE, self.cookie())
            .json(&rows)
            .send()
            .await
            .map_err(transport)?;
        check(response)?;
        Ok(())
    }

    async fn update_by_id(
        &self,
        kind: EntityKind,
        owner: &str,
        row: RemoteRow,
    ) -> StoreResult<bool> {
        self.ensure_owner(owner)?;
        let request = self.client.put(self.url(kind, Some(&row.id))).json(&row);
        self.send_found(request).await
    }

    async fn delete_by_id(&self, kind: EntityKind, owner: &str, id: &str) -> StoreResult<bool> {
        self.ensure_owner(owner)?;
        let request = self.client.delete(self.url(kind, Some(id)));
        self.send_found(request).await
    }
}
