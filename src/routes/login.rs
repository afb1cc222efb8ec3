//! All login/logout routes

use axum::{response::Response, Extension, Json};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    database::auth::{check_credentials_and_get_user, Credentials},
    error_handling::ApiError,
    guards::{check_if_already_logged_in, detect_admin_signup, CurrentUser},
    responses::{redirect, redirect_with_notice, Page},
    routes::paths,
    session::Session,
    SharedState,
};

#[derive(Debug, Serialize)]
pub(crate) struct LoginPage {
    /// Whether to offer the signup form
    signups_allowed: bool,
}

/// The login form
#[tracing::instrument(skip_all)]
pub(crate) async fn login(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
) -> Result<Page<LoginPage>, ApiError> {
    let admin_signup = detect_admin_signup(app.store.as_ref()).await?;
    check_if_already_logged_in(&app.config, admin_signup, &current)?;

    Ok(Page::new(
        session.notice().await,
        LoginPage {
            signups_allowed: app.config.forum.signups_allowed,
        },
    ))
}

/// Tries to log the user in
///
/// Unknown users, wrong passwords, banned and not yet activated accounts
/// all get the same answer.
#[tracing::instrument(skip(app, current, session))]
pub(crate) async fn authenticate(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Json(credentials): Json<Credentials>,
) -> Result<Response, ApiError> {
    check_if_already_logged_in(&app.config, false, &current)?;

    match check_credentials_and_get_user(app.store.as_ref(), &credentials).await? {
        Ok(user) => {
            info!(username = %user.username, "Logged in");
            session.authenticate(user.id).await;
            Ok(redirect_with_notice(&app.config.app.discussions_path, None))
        }
        Err(reason) => {
            debug!(?reason, "Login refused");
            Ok(redirect(
                paths::LOGIN,
                "Oops! That's not a valid username or password.",
            ))
        }
    }
}

/// Logs the current user out
///
/// Drops the whole session, not just the user.
#[tracing::instrument(skip_all)]
pub(crate) async fn logout(
    Extension(app): Extension<SharedState>,
    session: Session,
) -> Response {
    session.deauthenticate().await;

    let to = if app.config.forum.public_browsing {
        app.config.app.discussions_path.as_str()
    } else {
        paths::LOGIN
    };
    redirect(to, "You have been logged out.")
}
