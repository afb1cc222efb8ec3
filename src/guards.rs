//! The checks that run before the actual actions
//!
//! Every check either lets the request through, possibly handing back
//! what it looked up, or stops it with an [ApiError::Redirect] carrying the
//! notice for the next page. Handlers call them in the order they need.

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use color_eyre::{eyre::eyre, Report};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    database::{Invite, Store, User},
    error_handling::ApiError,
    responses::redirect,
    routes::paths,
    session::Session,
    settings::Config,
    SharedState,
};

/// The logged in user of this request, if any
///
/// Resolved once per request by [load_current_user].
#[derive(Clone, Debug)]
pub(crate) struct CurrentUser(pub(crate) Option<User>);

impl CurrentUser {
    pub(crate) fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }

    /// Trusted users get to see trusted posts
    pub(crate) fn is_trusted(&self) -> bool {
        self.user().map_or(false, User::is_trusted)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| eyre!("Current user layer is missing").into())
    }
}

/// Middleware resolving the session's user id into a [CurrentUser]
///
/// Banned users are logged out on the spot. Everyone else gets their
/// `last_active` bumped, which is what the online list is built from.
/// Needs to run inside [crate::session::manage_session].
pub(crate) async fn load_current_user<B>(mut request: Request<B>, next: Next<B>) -> Response {
    let current = match resolve_current_user(request.extensions()).await {
        Ok(Ok(current)) => current,
        Ok(Err(banned)) => return banned,
        Err(error) => return error.into_response(),
    };

    request.extensions_mut().insert(current);
    next.run(request).await
}

async fn resolve_current_user(
    extensions: &axum::http::Extensions,
) -> Result<Result<CurrentUser, Response>, ApiError> {
    let session = extensions
        .get::<Session>()
        .cloned()
        .ok_or(ApiError::MissingSession)?;
    let state = extensions
        .get::<SharedState>()
        .cloned()
        .ok_or_else(|| eyre!("App state is missing from extensions"))?;

    let Some(user_id) = session.user_id().await else {
        return Ok(Ok(CurrentUser(None)));
    };

    let Some(user) = state.store.find_user(user_id).await? else {
        debug!(?user_id, "User of session is gone");
        session.deauthenticate().await;
        return Ok(Ok(CurrentUser(None)));
    };

    let now = OffsetDateTime::now_utc();
    if user.is_banned(now) {
        info!(username = %user.username, "Logging out banned user");
        session.deauthenticate().await;
        return Ok(Err(redirect(paths::LOGIN, "You have been banned!")));
    }

    state.store.touch_user(user.id, now).await?;
    Ok(Ok(CurrentUser(Some(user))))
}

fn login_required() -> ApiError {
    ApiError::redirect(paths::LOGIN, "You must be logged in to do that")
}

/// Anonymous visitors only pass with public browsing enabled
pub(crate) fn requires_authentication(
    config: &Config,
    current: &CurrentUser,
) -> Result<(), ApiError> {
    if current.0.is_some() || config.forum.public_browsing {
        Ok(())
    } else {
        Err(login_required())
    }
}

/// A logged in user, regardless of public browsing
pub(crate) fn requires_user(current: &CurrentUser) -> Result<&User, ApiError> {
    current.user().ok_or_else(login_required)
}

/// Finds the user named in the path, by username first and then by id
#[instrument(skip(store))]
pub(crate) async fn load_user(store: &dyn Store, id: &str) -> Result<User, ApiError> {
    if let Some(user) = store.find_user_by_username(id).await? {
        return Ok(user);
    }
    if let Ok(id) = Uuid::try_parse(id) {
        if let Some(user) = store.find_user(id).await? {
            return Ok(user);
        }
    }
    Err(ApiError::redirect(paths::USERS, "User not found!"))
}

/// The first signup creates the administrator
pub(crate) async fn detect_admin_signup(store: &dyn Store) -> Result<bool, Report> {
    Ok(store.count_users().await? == 0)
}

/// Sections of the profile editor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EditPage {
    Admin,
    #[default]
    Info,
    Location,
    Services,
    Settings,
    TemporaryBan,
}

impl EditPage {
    const ALL: [EditPage; 6] = [
        EditPage::Admin,
        EditPage::Info,
        EditPage::Location,
        EditPage::Services,
        EditPage::Settings,
        EditPage::TemporaryBan,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EditPage::Admin => "admin",
            EditPage::Info => "info",
            EditPage::Location => "location",
            EditPage::Services => "services",
            EditPage::Settings => "settings",
            EditPage::TemporaryBan => "temporary_ban",
        }
    }
}

/// Unknown or missing pages show the info section
pub(crate) fn detect_edit_page(page: Option<&str>) -> EditPage {
    EditPage::ALL
        .into_iter()
        .find(|known| Some(known.as_str()) == page)
        .unwrap_or_default()
}

/// Nobody needs the login form while there is no user yet or when
/// already logged in
pub(crate) fn check_if_already_logged_in(
    config: &Config,
    admin_signup: bool,
    current: &CurrentUser,
) -> Result<(), ApiError> {
    if admin_signup {
        return Err(ApiError::redirect_silently(paths::NEW_USER));
    }
    if current.0.is_some() {
        return Err(ApiError::redirect_silently(
            config.app.discussions_path.as_str(),
        ));
    }
    Ok(())
}

/// The `token` parameter wins over a token remembered in the session
pub(crate) async fn invite_token(param: Option<String>, session: &Session) -> Option<String> {
    match param.filter(|token| !token.is_empty()) {
        Some(token) => Some(token),
        None => session.get(|state| state.invite_token.clone()).await,
    }
}

#[allow(missing_docs)]
pub(crate) async fn find_invite(
    store: &dyn Store,
    token: Option<&str>,
) -> Result<Option<Invite>, Report> {
    match token {
        Some(token) => store.find_invite(token).await,
        None => Ok(None),
    }
}

#[allow(missing_docs)]
pub(crate) fn check_for_expired_invite(
    invite: Option<&Invite>,
    now: OffsetDateTime,
) -> Result<(), ApiError> {
    match invite {
        Some(invite) if invite.is_expired(now) => {
            Err(ApiError::redirect(paths::LOGIN, "Your invite has expired"))
        }
        _ => Ok(()),
    }
}

/// Closed signups still let admins bootstrap and invitees in
pub(crate) fn check_for_signups_allowed(
    config: &Config,
    admin_signup: bool,
    invite: Option<&Invite>,
) -> Result<(), ApiError> {
    if !config.forum.signups_allowed && !admin_signup && invite.is_none() {
        Err(ApiError::redirect(paths::LOGIN, "Signups are not allowed"))
    } else {
        Ok(())
    }
}

/// Only the user themselves or, with `user_admin`, a user admin may pass
pub(crate) fn verify_user(
    current: Option<&User>,
    user: &User,
    user_admin: bool,
    redirect: &str,
) -> Result<(), ApiError> {
    let allowed = current.map_or(false, |current| {
        current.id == user.id || (user_admin && current.is_user_admin())
    });
    if allowed {
        Ok(())
    } else {
        Err(ApiError::redirect(
            redirect,
            "You don't have permission to do that!",
        ))
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    use super::{
        check_for_expired_invite, check_for_signups_allowed, detect_edit_page, load_user,
        verify_user, EditPage,
    };
    use crate::{
        database::{memory::tests::user, Invite, MemoryStore, NewUser, Store},
        error_handling::ApiError,
        settings::Config,
        types::Username,
    };

    fn config(signups_allowed: bool) -> Config {
        let mut config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[app]\nport = 3779\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        config.forum.signups_allowed = signups_allowed;
        config
    }

    fn invite(expires_at: OffsetDateTime) -> Invite {
        Invite {
            id: Uuid::new_v4(),
            token: "t".repeat(40),
            user_id: Uuid::new_v4(),
            email: "new@example.com".to_owned(),
            message: None,
            expires_at,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn notice(result: Result<(), ApiError>) -> Option<String> {
        match result {
            Err(ApiError::Redirect { notice, .. }) => notice,
            _ => None,
        }
    }

    #[test]
    fn unknown_edit_pages_fall_back_to_info() {
        assert_eq!(detect_edit_page(Some("settings")), EditPage::Settings);
        assert_eq!(detect_edit_page(Some("temporary_ban")), EditPage::TemporaryBan);
        assert_eq!(detect_edit_page(Some("../etc")), EditPage::Info);
        assert_eq!(detect_edit_page(None), EditPage::Info);
    }

    #[test]
    fn every_edit_page_is_reachable_by_name() {
        for page in EditPage::ALL {
            assert_eq!(detect_edit_page(Some(page.as_str())), page);
        }
    }

    #[test]
    fn expired_invites_are_stopped() {
        let now = OffsetDateTime::now_utc();
        assert!(check_for_expired_invite(Some(&invite(now + Duration::days(1))), now).is_ok());
        assert!(check_for_expired_invite(None, now).is_ok());
        assert_eq!(
            notice(check_for_expired_invite(
                Some(&invite(now - Duration::days(1))),
                now
            ))
            .as_deref(),
            Some("Your invite has expired")
        );
    }

    #[test]
    fn closed_signups_need_admin_signup_or_invite() {
        let closed = config(false);
        let invite = invite(OffsetDateTime::now_utc());

        assert!(check_for_signups_allowed(&config(true), false, None).is_ok());
        assert!(check_for_signups_allowed(&closed, true, None).is_ok());
        assert!(check_for_signups_allowed(&closed, false, Some(&invite)).is_ok());
        assert_eq!(
            notice(check_for_signups_allowed(&closed, false, None)).as_deref(),
            Some("Signups are not allowed")
        );
    }

    #[test]
    fn user_admins_may_act_for_others() {
        let lisa = user("lisa");
        let bart = user("bart");
        let mut moderator = user("moderator");
        moderator.user_admin = true;

        assert!(verify_user(Some(&lisa), &lisa, false, "/").is_ok());
        assert!(verify_user(Some(&bart), &lisa, true, "/").is_err());
        assert!(verify_user(Some(&moderator), &lisa, true, "/").is_ok());
        assert!(verify_user(Some(&moderator), &lisa, false, "/").is_err());
        assert_eq!(
            notice(verify_user(None, &lisa, true, "/users/lisa")).as_deref(),
            Some("You don't have permission to do that!")
        );
    }

    #[tokio::test]
    async fn users_are_found_by_name_or_id() {
        let store = MemoryStore::new();
        let created = store
            .create_user(NewUser {
                username: Username::try_from("Milhouse".to_owned()).unwrap(),
                email: None,
                password_hash: String::new(),
                realname: None,
                location: None,
                description: None,
                website: None,
                gamertag: None,
                twitter: None,
                inviter_id: None,
                activated: true,
                admin_signup: false,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(load_user(&store, "milhouse").await.unwrap().id, created.id);
        assert_eq!(
            load_user(&store, &created.id.to_string()).await.unwrap().id,
            created.id
        );
        match load_user(&store, "nelson").await {
            Err(ApiError::Redirect { to, notice }) => {
                assert_eq!(to, "/users");
                assert_eq!(notice.as_deref(), Some("User not found!"));
            }
            other => panic!("expected a redirect, got {other:?}"),
        }
    }
}
