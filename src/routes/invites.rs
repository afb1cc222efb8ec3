//! Handing out invites and inviting people

use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use color_eyre::eyre::Context;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument};

use crate::{
    database::{InviteError, NewInvite},
    error_handling::ApiError,
    guards::{load_user, requires_user, CurrentUser},
    mail,
    responses::{redirect, FieldError, Page},
    routes::paths,
    types::EMail,
    SharedState,
};

/// Length of the invite tokens
const TOKEN_LENGTH: usize = 40;

fn permission_denied(username: &str) -> ApiError {
    ApiError::redirect(
        paths::user(username),
        "You don't have permission to do that!",
    )
}

/// One more invite for the user, user admins only
#[instrument(skip(app, current))]
pub(crate) async fn grant_invite(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let current = requires_user(&current)?;
    let user = load_user(app.store.as_ref(), &id).await?;
    if !current.is_user_admin() {
        return Err(permission_denied(&user.username));
    }

    let Some(user) = app.store.grant_invite(user.id).await? else {
        return Err(ApiError::redirect(paths::USERS, "User not found!"));
    };
    info!(username = %user.username, invites = user.available_invites, "Granted invite");

    Ok(redirect(
        &paths::user(&user.username),
        format!("{} has been granted one invite.", user.username),
    ))
}

/// Takes all invites of the user away, user admins only
#[instrument(skip(app, current))]
pub(crate) async fn revoke_invites(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let current = requires_user(&current)?;
    let user = load_user(app.store.as_ref(), &id).await?;
    if !current.is_user_admin() {
        return Err(permission_denied(&user.username));
    }

    let Some(user) = app.store.revoke_invites(user.id).await? else {
        return Err(ApiError::redirect(paths::USERS, "User not found!"));
    };
    info!(username = %user.username, "Revoked invites");

    Ok(redirect(
        &paths::user(&user.username),
        format!("{} has been revoked of all invites.", user.username),
    ))
}

/// JSON for inviting someone
#[derive(Debug, Deserialize)]
pub(crate) struct InviteRequest {
    email: String,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InviteFormPage {
    email: String,
    message: Option<String>,
    errors: Vec<FieldError>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn invite_rejected(request: InviteRequest, error: FieldError) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Page::new(
            Some("Could not send your invite".to_owned()),
            InviteFormPage {
                email: request.email,
                message: request.message,
                errors: vec![error],
            },
        ),
    )
        .into_response()
}

/// Invites someone by mail
///
/// Uses up one of the inviter's invites, user admins have unlimited ones.
#[instrument(skip(app, current))]
pub(crate) async fn create_invite(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    Json(request): Json<InviteRequest>,
) -> Result<Response, ApiError> {
    let current = requires_user(&current)?;
    let unlimited = current.is_user_admin();
    let profile = paths::user(&current.username);
    if !unlimited && current.available_invites <= 0 {
        return Err(ApiError::redirect(profile, "You don't have any invites!"));
    }

    let email = match request.email.parse::<EMail>() {
        Ok(email) => email,
        Err(error) => return Ok(invite_rejected(request, FieldError::new("email", error))),
    };
    let message = request
        .message
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_owned);

    let now = OffsetDateTime::now_utc();
    let new_invite = NewInvite {
        inviter: current.id,
        unlimited,
        email,
        message,
        token: generate_token(),
        expires_at: now + Duration::days(app.config.forum.invite_expiry_days),
    };

    let invite = match app.store.create_invite(new_invite).await? {
        Ok(invite) => invite,
        Err(InviteError::NoInvitesLeft) => {
            return Err(ApiError::redirect(profile, "You don't have any invites!"))
        }
        Err(InviteError::AlreadyRegistered) => {
            return Ok(invite_rejected(
                request,
                FieldError::new("email", "is already registered"),
            ))
        }
    };

    let mut signup_url = app
        .config
        .app
        .base_url
        .join(paths::NEW_USER)
        .wrap_err("Building signup URL")?;
    signup_url
        .query_pairs_mut()
        .append_pair("token", &invite.token);

    if let Err(error) = app
        .mailer
        .send(mail::invite(
            current,
            &invite.email,
            invite.message.as_deref(),
            &signup_url,
        ))
        .await
    {
        error!(?error, email = %invite.email, "Could not send invite, withdrawing it");
        app.store.delete_invite(invite.id).await?;
        if !unlimited {
            app.store.grant_invite(current.id).await?;
        }
        return Ok(redirect(
            &profile,
            format!("Your invite to {} could not be sent, please try again later", invite.email),
        ));
    }
    info!(inviter = %current.username, email = %invite.email, "Invite created");

    Ok(redirect(
        &profile,
        format!("An invite has been sent to {}", invite.email),
    ))
}
