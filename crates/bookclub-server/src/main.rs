use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use bookclub_api::middleware::require_auth;
use bookclub_api::{AppState, AppStateInner, AuthConfig, auth, posts, users};
use bookclub_db::Database;
use bookclub_gateway::connection;
use bookclub_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookclub=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("BOOKCLUB_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("BOOKCLUB_DB_PATH").unwrap_or_else(|_| "bookclub.db".into());
    let host = std::env::var("BOOKCLUB_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BOOKCLUB_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let upload_dir =
        PathBuf::from(std::env::var("BOOKCLUB_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()));
    let access_ttl_secs: i64 = std::env::var("BOOKCLUB_ACCESS_TTL_SECS")
        .unwrap_or_else(|_| "3600".into())
        .parse()?;
    let refresh_ttl_secs: i64 = std::env::var("BOOKCLUB_REFRESH_TTL_SECS")
        .unwrap_or_else(|_| "2592000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        auth: AuthConfig {
            jwt_secret,
            access_ttl_secs,
            refresh_ttl_secs,
        },
        upload_dir: upload_dir.clone(),
        http: reqwest::Client::new(),
    });

    let server_state = ServerState {
        dispatcher: dispatcher.clone(),
        db: db.clone(),
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/google", post(auth::google_login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/user", get(auth::get_user))
        .route("/posts", get(posts::get_all_posts))
        .route("/posts/{id}", get(posts::get_post_by_id))
        .route("/posts/user/{user_name}", get(posts::get_posts_by_user))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/user/{user_id}", put(users::update_user))
        .route("/auth/user/{user_id}", delete(users::delete_user))
        .route("/auth/users", get(users::get_all_users))
        .route("/auth/users/online", get(users::get_online_users))
        .route("/posts", post(posts::create_post))
        .route("/posts/{id}", put(posts::update_post))
        .route("/posts/{id}", delete(posts::delete_post))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Bookclub server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct SocketQuery {
    #[serde(rename = "userId")]
    user_id: Uuid,
}

/// The handshake carries the user id as a query parameter; the connection
/// handler records the association and relays from there.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, query.user_id)
    })
}
