//! Session extraction & persistence
//!
//! [manage_session] runs around every handler: it restores the
//! [SessionState] named by the session cookie, hands it to the handler as
//! a [Session] and writes it back afterwards if anything changed. Flash
//! notices are handled here too: the one stored by the previous request is
//! taken out of the state, a [Flash] attached to the response is stored for
//! the next one.

mod memory;
mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::SET_COOKIE, request::Parts, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    error_handling::ApiError, forms::CachedUserParams, openid::PendingVerification,
    responses::Flash,
};

pub use self::redis::RedisBackend;
pub use memory::MemoryBackend;

/// Name of the cookie carrying the session id
pub const COOKIE_NAME: &str = "pfoertner_session";

/// Everything remembered between two requests of the same visitor
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    /// The logged in user
    pub user_id: Option<Uuid>,
    /// Invite token of a signup in progress
    pub invite_token: Option<String>,
    /// Prefilled signup form
    pub(crate) user_params: Option<CachedUserParams>,
    /// OpenID verification waiting for the provider to answer
    pub(crate) pending_openid: Option<PendingVerification>,
    /// Identifier confirmed by the OpenID provider
    pub authenticated_openid_url: Option<String>,
    /// Notice for the next rendered page
    pub flash: Option<String>,
}

/// Storage of [SessionState]s
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// `None` for unknown or expired sessions
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionState>, Report>;

    /// Creates or overwrites a session
    async fn store(&self, session_id: Uuid, state: &SessionState) -> Result<(), Report>;

    #[allow(missing_docs)]
    async fn remove(&self, session_id: Uuid) -> Result<(), Report>;
}

/// Shared handle to whatever backend is configured
pub type SessionBackend = Arc<dyn Backend>;

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    /// The flash notice left by the previous request
    notice: Option<String>,
    dirty: bool,
    /// Issue a new session id, dropping the old one
    renew: bool,
}

/// The session of the current request
///
/// Cloning is cheap, all clones share the same state. Changes are persisted
/// by [manage_session] once the handler is done.
#[derive(Clone, Debug)]
pub(crate) struct Session {
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    fn new(state: SessionState, notice: Option<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                dirty: notice.is_some(),
                state,
                notice,
                renew: false,
            })),
        }
    }

    /// Read access to the state
    pub(crate) async fn get<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.inner.lock().await.state)
    }

    /// Write access to the state, marks the session for saving
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut inner = self.inner.lock().await;
        inner.dirty = true;
        f(&mut inner.state)
    }

    pub(crate) async fn user_id(&self) -> Option<Uuid> {
        self.get(|state| state.user_id).await
    }

    /// The flash notice set by the previous request
    pub(crate) async fn notice(&self) -> Option<String> {
        self.inner.lock().await.notice.clone()
    }

    /// Logs `user_id` in under a fresh session id
    pub(crate) async fn authenticate(&self, user_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.renew = true;
        inner.dirty = true;
        inner.state.user_id = Some(user_id);
    }

    /// Forgets everything, the next stored state gets a new id
    pub(crate) async fn deauthenticate(&self) {
        let mut inner = self.inner.lock().await;
        inner.renew = true;
        inner.dirty = true;
        inner.state = SessionState::default();
    }

    async fn take(&self) -> Inner {
        std::mem::take(&mut *self.inner.lock().await)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or(ApiError::MissingSession)
    }
}

fn session_cookie(session_id: Uuid) -> Cookie<'static> {
    Cookie::build(COOKIE_NAME, session_id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build(COOKIE_NAME, "")
        .path("/")
        .http_only(true)
        .max_age(time::Duration::ZERO)
        .finish()
}

fn set_cookie(response: &mut Response, cookie: &Cookie<'_>) -> Result<(), Report> {
    response
        .headers_mut()
        .append(SET_COOKIE, HeaderValue::from_str(&cookie.to_string())?);
    Ok(())
}

/// Middleware restoring and persisting the [Session]
///
/// Expects a [SessionBackend] in the request extensions.
pub(crate) async fn manage_session<B>(request: Request<B>, next: Next<B>) -> Response {
    match restore_and_persist(request, next).await {
        Ok(response) => response,
        Err(error) => ApiError::UnknownError(error).into_response(),
    }
}

async fn restore_and_persist<B>(mut request: Request<B>, next: Next<B>) -> Result<Response, Report> {
    let backend = request
        .extensions()
        .get::<SessionBackend>()
        .cloned()
        .ok_or_else(|| eyre!("Session backend is missing from extensions"))?;

    let cookie_id = CookieJar::from_headers(request.headers())
        .get(COOKIE_NAME)
        .and_then(|cookie| Uuid::try_parse(cookie.value()).ok());

    let (session_id, mut state) = match cookie_id {
        Some(session_id) => match backend.load(session_id).await? {
            Some(state) => {
                trace!(?session_id, "Restored session");
                (Some(session_id), state)
            }
            None => {
                debug!(?session_id, "Unknown or expired session");
                (None, SessionState::default())
            }
        },
        None => (None, SessionState::default()),
    };

    let notice = state.flash.take();
    let session = Session::new(state, notice);
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    let Inner {
        mut state,
        mut dirty,
        renew,
        ..
    } = session.take().await;
    if let Some(Flash(notice)) = response.extensions_mut().remove::<Flash>() {
        state.flash = Some(notice);
        dirty = true;
    }
    if !dirty {
        return Ok(response);
    }

    let mut session_id = session_id;
    if renew {
        if let Some(old_id) = session_id.take() {
            backend.remove(old_id).await?;
        }
    }

    if state == SessionState::default() {
        if let Some(session_id) = session_id {
            backend.remove(session_id).await?;
        }
        if cookie_id.is_some() {
            set_cookie(&mut response, &removal_cookie())?;
        }
        return Ok(response);
    }

    let stored_id = session_id.unwrap_or_else(Uuid::new_v4);
    backend.store(stored_id, &state).await?;
    if session_id.is_none() {
        debug!(session_id = ?stored_id, "Issued session");
        set_cookie(&mut response, &session_cookie(stored_id))?;
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header::COOKIE, header::SET_COOKIE, Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{manage_session, Backend, MemoryBackend, Session, SessionBackend, SessionState};
    use crate::responses::redirect;

    async fn login(session: Session) -> &'static str {
        session.authenticate(Uuid::nil()).await;
        "ok"
    }

    async fn who(session: Session) -> String {
        format!("{:?} {:?}", session.user_id().await, session.notice().await)
    }

    async fn bye(session: Session) -> axum::response::Response {
        session.deauthenticate().await;
        redirect("/", "bye")
    }

    fn app(backend: SessionBackend) -> Router {
        Router::new()
            .route("/login", get(login))
            .route("/who", get(who))
            .route("/bye", get(bye))
            .layer(middleware::from_fn(manage_session))
            .layer(Extension(backend))
    }

    async fn call(app: &Router, uri: &str, cookie: Option<&str>) -> axum::response::Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        app.clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn cookie_of(response: &axum::response::Response) -> String {
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_owned()
    }

    async fn body(response: axum::response::Response) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn untouched_sessions_are_not_stored() {
        let backend = Arc::new(MemoryBackend::new());
        let app = app(backend.clone());

        let response = call(&app, "/who", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test]
    async fn login_issues_a_cookie_that_restores_the_user() {
        let backend = Arc::new(MemoryBackend::new());
        let app = app(backend.clone());

        let response = call(&app, "/login", None).await;
        let cookie = cookie_of(&response);
        assert!(cookie.starts_with("pfoertner_session="));

        let response = call(&app, "/who", Some(&cookie)).await;
        assert_eq!(
            body(response).await,
            format!("{:?} None", Some(Uuid::nil()))
        );
    }

    #[tokio::test]
    async fn flash_survives_exactly_one_request() {
        let backend = Arc::new(MemoryBackend::new());
        let app = app(backend.clone());

        let cookie = cookie_of(&call(&app, "/login", None).await);
        let response = call(&app, "/bye", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        // Logging out rotates the session
        let cookie = cookie_of(&response);

        let response = call(&app, "/who", Some(&cookie)).await;
        assert_eq!(body(response).await, "None Some(\"bye\")");

        let response = call(&app, "/who", Some(&cookie)).await;
        assert_eq!(body(response).await, "None None");
    }

    #[tokio::test]
    async fn unknown_session_ids_are_ignored() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .store(Uuid::new_v4(), &SessionState::default())
            .await
            .unwrap();
        let app = app(backend);

        let cookie = format!("pfoertner_session={}", Uuid::new_v4());
        let response = call(&app, "/who", Some(&cookie)).await;
        assert_eq!(body(response).await, "None None");
    }
}
