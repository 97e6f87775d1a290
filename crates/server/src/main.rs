use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use integrations::NotificationService;
use messaging::{MessagingContext, NotificationQueue, SendMessageRequest};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{DialogId, MessageId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{DialogView, DialogWithMessages, MessageView},
};
use storage::Storage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url, Cli};

#[derive(Clone)]
struct AppState {
    messaging: MessagingContext,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct ListDialogsQuery {
    user_id: i64,
    limit: Option<u32>,
    #[serde(default)]
    offset: u32,
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    user_id: i64,
    limit: Option<u32>,
    before: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    user_id: i64,
    dialog_id: i64,
    #[serde(default)]
    message_type: Option<String>,
    content: String,
    #[serde(default)]
    reply_to_id: Option<i64>,
    #[serde(default)]
    forward_from_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkReadResponse {
    marked: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnreadResponse {
    total: i64,
}

type HttpError = (StatusCode, Json<ApiError>);

fn http_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let settings = load_settings(cli.config.as_deref())?;
    let messaging_config = settings.messaging.to_config()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let (queue, worker) = NotificationQueue::channel(messaging_config.notification_queue_capacity);
    let notifier: Arc<dyn NotificationService> = Arc::new(storage.clone());
    let worker_handle = worker.spawn(storage.clone(), notifier);

    let state = AppState {
        messaging: MessagingContext::with_storage(storage, queue, messaging_config),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                error!(%error, "failed to listen for shutdown signal");
            }
        })
        .await?;

    // The router held the last queue handles; the worker exits once drained.
    if let Err(error) = worker_handle.await {
        error!(%error, "notification worker panicked");
    }
    info!("server stopped");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/dialogs", get(http_list_dialogs))
        .route("/dialogs/:dialog_id", get(http_get_dialog))
        .route("/dialogs/:dialog_id/messages", get(http_dialog_messages))
        .route("/dialogs/:dialog_id/read", post(http_mark_read))
        .route("/messages", post(http_send_message))
        .route("/unread", get(http_total_unread))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.messaging.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(error) => {
            error!(%error, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_list_dialogs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDialogsQuery>,
) -> Result<Json<Vec<DialogView>>, HttpError> {
    messaging::get_user_dialogs(
        &state.messaging,
        UserId(query.user_id),
        query.limit,
        query.offset,
    )
    .await
    .map(Json)
    .map_err(http_error)
}

async fn http_get_dialog(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Json<DialogView>, HttpError> {
    messaging::get_dialog(&state.messaging, UserId(query.user_id), DialogId(dialog_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_dialog_messages(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<DialogWithMessages>, HttpError> {
    messaging::get_dialog_with_messages(
        &state.messaging,
        UserId(query.user_id),
        DialogId(dialog_id),
        query.limit,
        query.before.map(MessageId),
    )
    .await
    .map(Json)
    .map_err(http_error)
}

async fn http_mark_read(
    State(state): State<Arc<AppState>>,
    Path(dialog_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Json<MarkReadResponse>, HttpError> {
    let marked =
        messaging::mark_messages_as_read(&state.messaging, UserId(query.user_id), DialogId(dialog_id))
            .await
            .map_err(http_error)?;
    Ok(Json(MarkReadResponse { marked }))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<MessageView>), HttpError> {
    let message_type = messaging::parse_message_type(body.message_type.as_deref().unwrap_or("text"))
        .map_err(http_error)?;
    let request = SendMessageRequest {
        dialog_id: DialogId(body.dialog_id),
        message_type,
        content: body.content,
        reply_to_id: body.reply_to_id.map(MessageId),
        forward_from_id: body.forward_from_id.map(MessageId),
    };
    let view = messaging::send_message(&state.messaging, UserId(body.user_id), request)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn http_total_unread(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UnreadResponse>, HttpError> {
    let total = messaging::get_total_unread_count(&state.messaging, UserId(query.user_id))
        .await
        .map_err(http_error)?;
    Ok(Json(UnreadResponse { total }))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
