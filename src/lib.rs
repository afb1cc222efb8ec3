#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(
    missing_docs,
    clippy::as_conversions,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cognitive_complexity,
    clippy::unwrap_used,
    clippy::branches_sharing_code,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::fn_params_excessive_bools,
    clippy::format_push_string,
    clippy::from_iter_instead_of_collect,
    clippy::get_unwrap,
    clippy::if_then_some_else_none,
    clippy::implicit_clone,
    clippy::inefficient_to_string,
    clippy::iter_not_returning_iterator,
    clippy::iter_on_empty_collections,
    clippy::iter_on_single_items,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::manual_assert,
    clippy::manual_let_else,
    clippy::manual_ok_or,
    clippy::manual_string_new,
    clippy::map_err_ignore
)]
#![doc = include_str!("../README.md")]

use std::{
    future::Future,
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    middleware,
    routing::{get, post},
    Extension, Router, Server,
};
use color_eyre::Report;
use futures::FutureExt;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::info;
use url::Url;

use crate::{
    database::{MemoryStore, PgStore, Store},
    guards::load_current_user,
    mail::{HttpMailer, LogMailer, Mailer},
    openid::{DirectVerifier, OpenIdVerifier},
    routes::{healthcheck, invites, login, openid as openid_routes, profile, reset, signup, users},
    session::{manage_session, MemoryBackend, RedisBackend, SessionBackend},
    settings::Config,
};

pub mod database;
mod error_handling;
mod forms;
mod guards;
pub mod mail;
pub mod openid;
mod responses;
mod routes;
pub mod session;
pub mod settings;
pub mod trace;
pub mod types;

/// Everything the handlers share
pub struct AppState {
    #[allow(missing_docs)]
    pub config: Arc<Config>,
    /// Users, invites & posts
    pub store: Arc<dyn Store>,
    #[allow(missing_docs)]
    pub sessions: SessionBackend,
    #[allow(missing_docs)]
    pub mailer: Arc<dyn Mailer>,
    #[allow(missing_docs)]
    pub openid: Arc<dyn OpenIdVerifier>,
}

/// How handlers receive the [AppState]
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Connects to whatever the config names, in-memory replacements for
    /// everything that is not configured
    pub async fn from_config(config: Config) -> Result<Self, Report> {
        let store: Arc<dyn Store> = match &config.database {
            Some(database) => Arc::new(PgStore::connect(database).await?),
            None => {
                info!("No database configured, users are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let sessions: SessionBackend = match &config.redis {
            Some(redis) => Arc::new(RedisBackend::open(redis.url.as_str())?),
            None => {
                info!("No redis configured, sessions are kept in memory");
                Arc::new(MemoryBackend::new())
            }
        };

        let mailer: Arc<dyn Mailer> = match HttpMailer::from_config(&config.mail)? {
            Some(mailer) => Arc::new(mailer),
            None => Arc::new(LogMailer),
        };

        let openid = Arc::new(DirectVerifier::new(config.app.base_url.clone())?);

        Ok(Self {
            config: Arc::new(config),
            store,
            sessions,
            mailer,
            openid,
        })
    }
}

fn allowed_origin(config: &Config, origin: &str) -> bool {
    let Ok(origin) = Url::parse(origin) else {
        return false;
    };
    config.app.allowed_origins.contains(&origin)
        || (config.app.allow_localhost && origin.host_str() == Some("localhost"))
}

/// The complete application with all layers
pub fn app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let sessions = Arc::clone(&state.sessions);
    let state: SharedState = Arc::new(state);

    let routes = Router::new()
        .route("/health_check", get(healthcheck::health_check))
        .route("/users", get(users::index).post(signup::create))
        .route("/users/banned", get(users::banned))
        .route("/users/recently_joined", get(users::recently_joined))
        .route("/users/online", get(users::online))
        .route("/users/admins", get(users::admins))
        .route("/users/xboxlive", get(users::xboxlive))
        .route("/users/social", get(users::social))
        .route("/users/top_posters", get(users::top_posters))
        .route("/users/trusted", get(users::trusted))
        .route("/users/new", get(signup::new))
        .route("/users/login", get(login::login))
        .route("/users/authenticate", post(login::authenticate))
        .route("/users/logout", post(login::logout))
        .route("/users/password_reset", get(reset::password_reset))
        .route("/users/deliver_password", post(reset::deliver_password))
        .route("/users/:id", get(users::show).patch(profile::update))
        .route("/users/:id/posts", get(users::posts))
        .route("/users/:id/stats", get(users::stats))
        .route("/users/:id/edit", get(profile::edit))
        .route("/users/:id/update_openid", get(profile::update_openid))
        .route("/users/:id/grant_invite", post(invites::grant_invite))
        .route("/users/:id/revoke_invites", post(invites::revoke_invites))
        .route("/invites", post(invites::create_invite))
        .route("/openid/complete", get(openid_routes::complete));

    // Layers run top to bottom
    routes.layer(
        ServiceBuilder::new()
            .set_x_request_id(MakeRequestUuid)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .propagate_x_request_id()
            .layer(Extension(config))
            .layer(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST, Method::PATCH])
                    .allow_origin(AllowOrigin::predicate(|header, request| {
                        let Ok(origin) = header.to_str() else {
                            // We don't allow non utf-origins at the moment
                            return false;
                        };
                        request
                            .extensions
                            .get::<Arc<Config>>()
                            .map_or(false, |config| allowed_origin(config, origin))
                    }))
                    .allow_headers([CONTENT_TYPE])
                    .allow_credentials(true),
            )
            .layer(Extension(state))
            .layer(Extension(sessions))
            .layer(middleware::from_fn(manage_session))
            .layer(middleware::from_fn(load_current_user)),
    )
}

/// Run the complete application
///
/// Returns the address actually bound, useful with port 0, and the server
/// future.
pub async fn create_app(
    config: Config,
) -> Result<(SocketAddr, impl Future<Output = Result<(), Report>> + Send), Report> {
    let state = AppState::from_config(config).await?;
    run_server(state)
}

/// Serve an already assembled [AppState]
pub fn run_server(
    state: AppState,
) -> Result<(SocketAddr, impl Future<Output = Result<(), Report>> + Send), Report> {
    let addr = SocketAddr::new(state.config.app.listen_on, state.config.app.port);
    let listener = TcpListener::bind(addr)?;
    let addr = listener.local_addr()?;

    info!("Listening on http://{}", addr);

    Ok((
        addr,
        Server::from_tcp(listener)?
            .serve(app(state).into_make_service())
            .map(|r| r.map_err(|e| e.into())),
    ))
}

#[cfg(test)]
mod tests {
    use super::allowed_origin;
    use crate::settings::Config;

    fn parse_config(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn cors_origins_come_from_config() {
        let config = parse_config(
            "[app]\nallowed_origins = [\"https://forum.example/\"]\nallow_localhost = false\n",
        );
        assert!(allowed_origin(&config, "https://forum.example"));
        assert!(!allowed_origin(&config, "https://evil.example"));
        assert!(!allowed_origin(&config, "http://localhost:5173"));
        assert!(!allowed_origin(&config, "not a url"));

        let dev = parse_config("[app]\nallow_localhost = true\n");
        assert!(allowed_origin(&dev, "http://localhost:5173"));
    }
}
