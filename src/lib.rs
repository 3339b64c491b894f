//! Verdant is a small account service: registration, email
//! verification, password login, MFA gating and session issuance.

#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
mod auth;
mod crypto;
mod database;
pub mod error;
mod mail;
mod middleware;
mod router;
mod token;
mod user;
mod verification;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer,
};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: mail::Mailer,
    pub auth: auth::Authenticator,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Stamp every request with an id before anything logs it.
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        )
        // Echo the request id back to the caller.
        .layer(PropagateRequestIdLayer::x_request_id());

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /auth/login` goes to `login`.
        .route("/auth/login", post(router::login::handler))
        // `POST /auth/verify-email` redeems; `GET` renders the bridge.
        .route(
            "/auth/verify-email",
            post(router::verify_email::handler)
                .get(router::verify_email::bridge),
        )
        // `POST /users` goes to `create`.
        .route("/users", post(router::create::handler))
        // Unmatched paths share the error envelope too.
        .fallback(fallback)
        // Not `route_layer`: the envelope must also cover the fallback.
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::envelope,
        ))
        .with_state(state)
        .layer(middleware)
}

async fn fallback() -> ServerError {
    ServerError::NotFound("Route not found.".to_owned())
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
                &config.retry,
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    // handle jwt.
    let secret = std::env::var("JWT_SECRET").map_err(|_| {
        ServerError::Config(
            "missing `JWT_SECRET` environment variable".to_owned(),
        )
    })?;
    let token = token::TokenManager::new(&config.url, &secret, &config.token);

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        mail::Mailer::new(cfg, &config.url)?
    } else {
        tracing::warn!("missing `mail` entry on `config.yaml` file, mailer runs in no-op mode");
        mail::Mailer::default()
    };

    let users = user::UserService::new(db.postgres.clone(), Arc::clone(&crypto));
    let verifications = verification::TokenService::new(
        db.postgres.clone(),
        Arc::clone(&crypto),
        config.token.verification_ttl_secs,
    );
    let auth = auth::Authenticator::new(
        users,
        verifications,
        token.clone(),
        mail.clone(),
    );

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        auth,
    })
}
