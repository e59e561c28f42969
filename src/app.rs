use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::Config;
use crate::editor::{EditDraft, EditorState, TableView};
use crate::error::{AuthError, EditorError, TransientError};
use crate::inventory::ItemForm;
use crate::mutations::MutationCoordinator;
use crate::oauth::GoogleOAuth;
use crate::session::{AuthProvider, SessionGateway};
use crate::sheets::{GoogleSheets, RemoteTable, TableStore};
use crate::sync::{SyncState, Synchronizer};
use crate::table::{SnapshotStore, TableSnapshot};

const STATE_COOKIE: &str = "oauth_state";

pub struct AppState {
    gateway: Arc<SessionGateway>,
    store: Arc<SnapshotStore>,
    sync: Synchronizer,
    mutations: MutationCoordinator,
    editor: Mutex<EditorState>,
}

impl AppState {
    pub fn new(config: &Config, provider: Arc<dyn AuthProvider>, table: Arc<dyn TableStore>) -> Arc<Self> {
        let store = Arc::new(SnapshotStore::new(table.clone()));
        Arc::new(AppState {
            gateway: Arc::new(SessionGateway::new(provider)),
            sync: Synchronizer::new(table.clone(), store.clone(), config.poll),
            mutations: MutationCoordinator::new(table, store.clone()),
            store,
            editor: Mutex::new(EditorState::new(config.sheet.reserved_columns.clone())),
        })
    }

    /// Tie the synchronizer to sign-in transitions. Needs a running runtime.
    pub fn follow_session(&self) {
        self.sync.follow_session(self.gateway.clone());
    }

    pub fn gateway(&self) -> &Arc<SessionGateway> {
        &self.gateway
    }

    pub fn sync(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    fn editor(&self) -> MutexGuard<'_, EditorState> {
        lock(&self.editor)
    }

    fn require_session(&self) -> Result<(), ApiError> {
        if self.gateway.currently_signed_in() {
            Ok(())
        } else {
            Err(AuthError::NotSignedIn.into())
        }
    }

    fn snapshot(&self) -> Arc<TableSnapshot> {
        self.store
            .current()
            .unwrap_or_else(|| Arc::new(TableSnapshot::from_values(Vec::new(), None)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type ConfigLoader = Box<dyn Fn() -> Result<Config, AuthError> + Send + Sync>;

/// State of the error screen served while the configuration is incomplete.
///
/// `POST /auth/retry` reloads the configuration; once it loads, the setup
/// server shuts down and hands the config back.
pub struct SetupState {
    last_error: Mutex<AuthError>,
    load: ConfigLoader,
    loaded: Mutex<Option<Config>>,
    ready: Notify,
}

impl SetupState {
    pub fn new<F>(error: AuthError, load: F) -> Arc<Self>
    where
        F: Fn() -> Result<Config, AuthError> + Send + Sync + 'static,
    {
        Arc::new(SetupState {
            last_error: Mutex::new(error),
            load: Box::new(load),
            loaded: Mutex::new(None),
            ready: Notify::new(),
        })
    }

    /// The configuration loaded by a successful retry, if any.
    pub fn take_config(&self) -> Option<Config> {
        lock(&self.loaded).take()
    }

    fn last_error(&self) -> AuthError {
        lock(&self.last_error).clone()
    }
}

#[derive(Serialize)]
struct SaveResponse {
    status: String,
    message: Option<String>,
}

impl SaveResponse {
    fn ok() -> Json<SaveResponse> {
        Json(SaveResponse {
            status: "ok".to_string(),
            message: None,
        })
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: String,
    message: String,
    blocking: bool,
}

#[derive(Serialize)]
struct SessionStatus {
    signed_in: bool,
    account: Option<String>,
    last_error: Option<String>,
    auto_refresh: bool,
    sync_state: SyncState,
    refreshing: bool,
    last_refresh: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ToggleResponse {
    index: usize,
    visible: bool,
    visible_columns: Vec<usize>,
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct DraftCell {
    column: usize,
    value: String,
}

/// Error returned by handlers. Auth failures are blocking; the rest are notices.
pub struct ApiError(EditorError);

impl<E> From<E> for ApiError
where
    E: Into<EditorError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EditorError::Auth(AuthError::Config(_) | AuthError::Initialization(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EditorError::Auth(_) => StatusCode::UNAUTHORIZED,
            EditorError::Transient(TransientError::StaleRow { .. }) => StatusCode::CONFLICT,
            EditorError::Transient(_) => StatusCode::BAD_GATEWAY,
            EditorError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = ErrorResponse {
            status: "error".to_string(),
            message: self.0.to_string(),
            blocking: self.0.is_blocking(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_landing))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/retry", post(retry_initialize))
        .route("/api/session", get(session_status))
        .route("/api/table", get(get_table))
        .route("/api/refresh", post(refresh))
        .route("/api/rows", post(add_row))
        .route("/api/rows/:index/edit", post(begin_edit))
        .route("/api/rows/:index/draft", put(set_draft))
        .route("/api/rows/:index/save", post(save_row))
        .route("/api/edit/cancel", post(cancel_edit))
        .route("/api/rows/:index/delete", post(request_delete))
        .route("/api/delete/confirm", post(confirm_delete))
        .route("/api/delete/cancel", post(cancel_delete))
        .route("/api/columns/:index/toggle", post(toggle_column))
        .with_state(state)
}

/// Routes available before the configuration is usable. Everything except the
/// session status and the retry action answers with the blocking error.
pub fn setup_router(setup: Arc<SetupState>) -> Router {
    Router::new()
        .route("/", get(serve_landing))
        .route("/auth/retry", post(retry_config))
        .route("/api/session", get(setup_status))
        .fallback(setup_blocked)
        .with_state(setup)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let provider: Arc<dyn AuthProvider> = Arc::new(GoogleOAuth::new(config.auth.clone(), http.clone()));
    let api = Arc::new(GoogleSheets::new(
        http,
        config.sheet.spreadsheet_id.clone(),
        provider.clone(),
    ));
    let table: Arc<dyn TableStore> = Arc::new(RemoteTable::new(api, config.sheet.sheet_name.clone()));

    let state = AppState::new(&config, provider, table);
    state.follow_session();
    if let Err(e) = state.gateway.initialize().await {
        log::error!("Starting without a usable auth provider ({}); POST /auth/retry to try again", e);
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Serve the error screen until a retry loads the configuration, then return it.
pub async fn serve_setup(
    bind_addr: &str,
    setup: Arc<SetupState>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(bind_addr).await?;
    log::warn!(
        "Starting without a usable configuration ({}); POST /auth/retry after fixing it",
        setup.last_error()
    );
    log::info!("Listening on http://{}", bind_addr);

    let shutdown = setup.clone();
    axum::serve(listener, setup_router(setup.clone()))
        .with_graceful_shutdown(async move { shutdown.ready.notified().await })
        .await?;

    setup
        .take_config()
        .ok_or_else(|| "setup server stopped without a configuration".into())
}

async fn retry_config(State(setup): State<Arc<SetupState>>) -> Result<Json<SaveResponse>, ApiError> {
    match (setup.load)() {
        Ok(config) => {
            log::info!("Configuration loaded, starting the editor");
            *lock(&setup.loaded) = Some(config);
            setup.ready.notify_one();
            Ok(SaveResponse::ok())
        }
        Err(e) => {
            log::error!("Configuration still unusable: {}", e);
            *lock(&setup.last_error) = e.clone();
            Err(e.into())
        }
    }
}

async fn setup_status(State(setup): State<Arc<SetupState>>) -> Json<SessionStatus> {
    Json(SessionStatus {
        signed_in: false,
        account: None,
        last_error: Some(setup.last_error().message()),
        auto_refresh: false,
        sync_state: SyncState::Idle,
        refreshing: false,
        last_refresh: None,
    })
}

async fn setup_blocked(State(setup): State<Arc<SetupState>>) -> ApiError {
    setup.last_error().into()
}

async fn serve_landing() -> Html<&'static str> {
    Html(
        "<!doctype html><title>Inventory</title>\
         <p><a href=\"/auth/login\">Sign in with Google</a></p>",
    )
}

async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Response, ApiError> {
    let csrf = uuid::Uuid::new_v4().to_string();
    let url = state
        .gateway
        .sign_in_url(&csrf)
        .ok_or_else(|| AuthError::Config("no interactive sign-in available".into()))?;

    let cookie = Cookie::build((STATE_COOKIE, csrf))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    Ok((jar.add(cookie), Redirect::to(&url)).into_response())
}

async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = params.error {
        return Err(AuthError::SignIn(error).into());
    }

    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    if expected.is_none() || expected != params.state {
        log::warn!("OAuth callback with mismatching state");
        return Err(AuthError::SignIn("state mismatch".into()).into());
    }
    let code = params
        .code
        .ok_or_else(|| AuthError::SignIn("missing authorization code".into()))?;

    state.gateway.sign_in(&code).await?;

    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/"));
    Ok((jar, Redirect::to("/")).into_response())
}

async fn logout(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.sync.stop();
    let result = state.gateway.sign_out().await;
    state.editor().reset();
    state.store.clear();
    result?;
    Ok(SaveResponse::ok())
}

async fn retry_initialize(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.gateway.initialize().await?;
    Ok(SaveResponse::ok())
}

async fn session_status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    let session = state.gateway.session();
    let sync_state = state.sync.state();
    Json(SessionStatus {
        signed_in: session.signed_in,
        account: session.account,
        last_error: session.last_error,
        auto_refresh: sync_state != SyncState::Idle,
        sync_state,
        refreshing: state.store.is_refreshing(),
        last_refresh: state.store.last_refresh(),
    })
}

async fn get_table(State(state): State<Arc<AppState>>) -> Result<Json<TableView>, ApiError> {
    state.require_session()?;
    let snapshot = state.store.current();
    Ok(Json(state.editor().view(snapshot.as_deref())))
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    state.store.reload(None).await?;
    Ok(SaveResponse::ok())
}

async fn add_row(
    State(state): State<Arc<AppState>>,
    Json(form): Json<ItemForm>,
) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    form.validate()?;
    let account = state.gateway.session().account;
    let row = form.into_row(Utc::now(), account.as_deref());
    state.mutations.add(row).await?;
    Ok(SaveResponse::ok())
}

async fn begin_edit(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<EditDraft>, ApiError> {
    state.require_session()?;
    let snapshot = state.snapshot();
    let mut editor = state.editor();
    let draft = editor.begin_edit(index, &snapshot)?;
    Ok(Json(draft.clone()))
}

async fn set_draft(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Json(cell): Json<DraftCell>,
) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    let snapshot = state.snapshot();
    state
        .editor()
        .set_draft_cell(index, cell.column, cell.value, &snapshot)?;
    Ok(SaveResponse::ok())
}

async fn save_row(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    let snapshot = state.snapshot();
    let row = state.editor().take_save(index, &snapshot)?;
    state.mutations.update(index, row).await?;
    Ok(SaveResponse::ok())
}

async fn cancel_edit(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    state.editor().cancel_edit();
    Ok(SaveResponse::ok())
}

async fn request_delete(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    let snapshot = state.snapshot();
    state.editor().request_delete(index, &snapshot)?;
    Ok(SaveResponse::ok())
}

async fn confirm_delete(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    let index = state.editor().take_pending_delete()?;
    state.mutations.delete(index).await?;
    Ok(SaveResponse::ok())
}

async fn cancel_delete(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, ApiError> {
    state.require_session()?;
    state.editor().cancel_delete();
    Ok(SaveResponse::ok())
}

async fn toggle_column(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<ToggleResponse>, ApiError> {
    state.require_session()?;
    let snapshot = state.snapshot();
    let mut editor = state.editor();
    let visible = editor.toggle_column(index, &snapshot)?;
    let visible_columns = editor.visible().map(|v| v.to_vec()).unwrap_or_default();
    Ok(Json(ToggleResponse {
        index,
        visible,
        visible_columns,
    }))
}
