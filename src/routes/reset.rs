//! Password resets
//!
//! There are no reset links: a forgotten password is replaced with a
//! generated one, which is mailed to the user.

use axum::{response::Response, Extension, Json};
use color_eyre::eyre::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    database::{UpdateError, UserChanges},
    error_handling::ApiError,
    mail,
    responses::{redirect, Page},
    routes::paths,
    session::Session,
    types::{EMail, Password},
    SharedState,
};

#[derive(Debug, Serialize)]
pub(crate) struct ResetPage {}

/// The form asking for the email address
#[tracing::instrument(skip_all)]
pub(crate) async fn password_reset(session: Session) -> Page<ResetPage> {
    Page::new(session.notice().await, ResetPage {})
}

/// JSON for requesting a new password
#[derive(Debug, Deserialize)]
pub(crate) struct ResetRequest {
    /// Left unvalidated so a typo gets the usual notice instead of a 422
    email: String,
}

fn reset_failed() -> Response {
    redirect(
        paths::PASSWORD_RESET,
        "Could not reset your password. Did you provide the right email?",
    )
}

/// Replaces the password of an activated, not banned user and mails it
#[tracing::instrument(skip(app))]
pub(crate) async fn deliver_password(
    Extension(app): Extension<SharedState>,
    Json(ResetRequest { email }): Json<ResetRequest>,
) -> Result<Response, ApiError> {
    let Ok(email) = email.parse::<EMail>() else {
        return Ok(reset_failed());
    };
    let Some(user) = app.store.find_user_by_email(&email).await? else {
        debug!("No user with this email");
        return Ok(reset_failed());
    };
    if !user.activated || user.is_banned(OffsetDateTime::now_utc()) {
        debug!(username = %user.username, "User may not reset the password");
        return Ok(reset_failed());
    }

    let password = Password::generate();
    let login_url = app
        .config
        .app
        .base_url
        .join(paths::LOGIN)
        .wrap_err("Building login URL")?;

    // Mailed first, an unsent password would lock the user out
    app.mailer
        .send(mail::password_reminder(&user, &email, &password, &login_url))
        .await?;

    let changes = UserChanges {
        password_hash: Some(password.hash().wrap_err("Hashing password")?.to_string()),
        ..UserChanges::default()
    };
    match app.store.update_user(user.id, changes).await? {
        Ok(_) => {}
        Err(UpdateError::NotFound) => return Ok(reset_failed()),
        Err(error) => return Err(color_eyre::eyre::eyre!("Updating password: {error:?}").into()),
    }

    info!(username = %user.username, "Mailed a new password");
    Ok(redirect(paths::LOGIN, "A new password has been mailed to you"))
}
