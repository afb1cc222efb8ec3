//! Editing profiles, including the OpenID URL

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use color_eyre::{eyre::Context, Report};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument};

use crate::{
    database::{UpdateError, User, UserChanges},
    error_handling::ApiError,
    forms::{validate_password, UserParams},
    guards::{
        detect_edit_page, load_user, requires_authentication, requires_user, verify_user,
        CurrentUser, EditPage,
    },
    openid::start_openid_session,
    responses::{redirect, FieldError, Page},
    routes::paths,
    session::Session,
    types::{EMail, Username},
    SharedState,
};

#[derive(Debug, Deserialize)]
pub(crate) struct EditQuery {
    page: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EditUserPage {
    page: EditPage,
    /// The email is not part of the public user data
    email: Option<String>,
    user: User,
    errors: Vec<FieldError>,
}

impl EditUserPage {
    fn new(page: EditPage, user: User, errors: Vec<FieldError>) -> Self {
        Self {
            page,
            email: user.email.clone(),
            user,
            errors,
        }
    }
}

/// The profile editor, for the user and for user admins
#[instrument(skip(app, current, session))]
pub(crate) async fn edit(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
    Query(query): Query<EditQuery>,
) -> Result<Page<EditUserPage>, ApiError> {
    let current = requires_user(&current)?;
    let user = load_user(app.store.as_ref(), &id).await?;
    let page = detect_edit_page(query.page.as_deref());
    verify_user(Some(current), &user, true, &paths::user(&user.username))?;

    Ok(Page::new(
        session.notice().await,
        EditUserPage::new(page, user, Vec::new()),
    ))
}

/// Longer bans should be permanent ones
const MAX_BAN_DAYS: i64 = 36500;

/// Turns the submitted form into changes, collecting all errors
fn user_changes(
    params: UserParams,
    now: OffsetDateTime,
) -> Result<Result<UserChanges, Vec<FieldError>>, Report> {
    let mut errors = Vec::new();

    let username = match params.username.map(|username| username.parse::<Username>()) {
        Some(Ok(username)) => Some(username),
        Some(Err(error)) => {
            errors.push(FieldError::new("username", error));
            None
        }
        None => None,
    };

    let email = match params.email.map(|email| email.trim().to_owned()) {
        Some(email) if email.is_empty() => Some(email),
        Some(email) => match email.parse::<EMail>() {
            Ok(email) => Some(String::from(email)),
            Err(error) => {
                errors.push(FieldError::new("email", error));
                None
            }
        },
        None => None,
    };

    let password = validate_password(
        params.password.as_ref(),
        params.password_confirmation.as_ref(),
        false,
        &mut errors,
    );

    let banned_until = match params.ban_days {
        Some(0) => Some(None),
        Some(days) if days < 0 => {
            errors.push(FieldError::new("ban_days", "must not be negative"));
            None
        }
        Some(days) => match (days <= MAX_BAN_DAYS)
            .then(|| now.checked_add(Duration::days(days)))
            .flatten()
        {
            Some(until) => Some(Some(until)),
            None => {
                errors.push(FieldError::new("ban_days", "is too long"));
                None
            }
        },
        None => None,
    };

    if params.available_invites.map_or(false, |invites| invites < 0) {
        errors.push(FieldError::new("available_invites", "must not be negative"));
    }

    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    let password_hash = password
        .map(|password| password.hash().map(|hash| hash.to_string()))
        .transpose()
        .wrap_err("Hashing password")?;

    Ok(Ok(UserChanges {
        username,
        realname: params.realname,
        email,
        password_hash,
        location: params.location,
        description: params.description,
        website: params.website,
        gamertag: params.gamertag,
        twitter: params.twitter,
        admin: params.admin,
        user_admin: params.user_admin,
        trusted: params.trusted,
        activated: params.activated,
        banned: params.banned,
        banned_until,
        available_invites: params.available_invites,
    }))
}

fn render_edit(status: StatusCode, notice: &str, page: EditUserPage) -> Response {
    (status, Page::new(Some(notice.to_owned()), page)).into_response()
}

/// Saves the profile
///
/// A changed OpenID URL is not saved right away but verified first, see
/// [update_openid].
#[instrument(skip(app, current, session, params))]
pub(crate) async fn update(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
    Query(query): Query<EditQuery>,
    Json(params): Json<UserParams>,
) -> Result<Response, ApiError> {
    let current = requires_user(&current)?;
    let user = load_user(app.store.as_ref(), &id).await?;
    let page = detect_edit_page(query.page.as_deref());
    verify_user(Some(current), &user, true, &paths::user(&user.username))?;

    let mut params = if current.is_user_admin() {
        params
    } else {
        params.safe_attributes()
    };
    if !current.admin {
        params.admin = None;
    }

    let new_openid_url = match params.openid_url.take() {
        Some(openid_url) if Some(&openid_url) != user.openid_url.as_ref() => Some(openid_url),
        _ => None,
    };

    let changes = match user_changes(params, OffsetDateTime::now_utc())? {
        Ok(changes) => changes,
        Err(errors) => {
            return Ok(render_edit(
                StatusCode::UNPROCESSABLE_ENTITY,
                "There were errors saving your changes",
                EditUserPage::new(page, user, errors),
            ))
        }
    };

    let updated = match app.store.update_user(user.id, changes).await? {
        Ok(updated) => updated,
        Err(UpdateError::NotFound) => {
            return Err(ApiError::redirect(paths::USERS, "User not found!"))
        }
        Err(error) => {
            let field = if error == UpdateError::UsernameTaken {
                "username"
            } else {
                "email"
            };
            return Ok(render_edit(
                StatusCode::UNPROCESSABLE_ENTITY,
                "There were errors saving your changes",
                EditUserPage::new(
                    page,
                    user,
                    vec![FieldError::new(field, "has already been taken")],
                ),
            ));
        }
    };
    info!(username = %updated.username, by = %current.username, "Profile updated");

    if updated.id == current.id {
        // A changed password must not leave the old session id usable
        session.authenticate(updated.id).await;
    }

    let Some(new_openid_url) = new_openid_url else {
        return Ok(redirect(
            &paths::edit_user_page(&updated.username, page),
            "Your changes were saved!",
        ));
    };

    let provider = start_openid_session(
        app.openid.as_ref(),
        &session,
        &app.config.app.base_url,
        &new_openid_url,
        paths::update_openid(&updated.username),
        paths::edit_user_page(&updated.username, page),
    )
    .await?;

    Ok(match provider {
        Some(provider) => Redirect::to(provider.as_str()).into_response(),
        None => render_edit(
            StatusCode::OK,
            "That's not a valid OpenID URL!",
            EditUserPage::new(page, updated, Vec::new()),
        ),
    })
}

/// Saves the OpenID URL the provider just confirmed
#[instrument(skip(app, current, session))]
pub(crate) async fn update_openid(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    requires_authentication(&app.config, &current)?;
    let user = load_user(app.store.as_ref(), &id).await?;
    verify_user(current.user(), &user, true, &paths::user(&user.username))?;

    let verified = session
        .update(|state| {
            state.pending_openid = None;
            state.authenticated_openid_url.take()
        })
        .await;

    if let Some(openid_url) = verified {
        if app.store.set_openid_url(user.id, &openid_url).await? {
            info!(username = %user.username, %openid_url, "OpenID URL verified");
            return Ok(redirect(
                &paths::user(&user.username),
                "Your OpenID URL was updated!",
            ));
        }
    }

    let notice = session
        .notice()
        .await
        .unwrap_or_else(|| "OpenID verification failed!".to_owned());
    Ok(redirect(&paths::edit_user(&user.username), notice))
}
