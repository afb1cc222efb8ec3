//! Signing up, with or without an invite

use axum::{
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use color_eyre::{eyre::Context, Report};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, instrument};

use crate::{
    database::{CreateError, Invite, NewUser, Store, User},
    error_handling::ApiError,
    forms::{blank_to_none, validate_password, CachedUserParams, UserParams},
    guards::{
        check_for_expired_invite, check_for_signups_allowed, detect_admin_signup, find_invite,
        invite_token, EditPage,
    },
    mail,
    openid::start_openid_session,
    responses::{redirect, redirect_with_notice, FieldError, Page},
    routes::paths,
    session::Session,
    types::{EMail, Username},
    SharedState,
};

#[derive(Debug, Deserialize)]
pub(crate) struct TokenQuery {
    token: Option<String>,
}

/// Who invited the visitor
#[derive(Debug, Serialize)]
pub(crate) struct InviteInfo {
    email: String,
    inviter: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SignupPage {
    /// The account will be the administrator
    admin_signup: bool,
    user: CachedUserParams,
    invite: Option<InviteInfo>,
    errors: Vec<FieldError>,
}

/// Outcome of the guards in front of both signup actions
struct SignupGate {
    admin_signup: bool,
    invite: Option<Invite>,
}

async fn pass_signup_gate(
    app: &SharedState,
    session: &Session,
    token: Option<String>,
) -> Result<SignupGate, ApiError> {
    let store = app.store.as_ref();
    let admin_signup = detect_admin_signup(store).await?;
    let token = invite_token(token, session).await;
    let invite = find_invite(store, token.as_deref()).await?;
    check_for_expired_invite(invite.as_ref(), OffsetDateTime::now_utc())?;
    check_for_signups_allowed(&app.config, admin_signup, invite.as_ref())?;

    Ok(SignupGate {
        admin_signup,
        invite,
    })
}

async fn invite_info(store: &dyn Store, invite: &Invite) -> Result<InviteInfo, Report> {
    let inviter = store.find_user(invite.user_id).await?;
    Ok(InviteInfo {
        email: invite.email.clone(),
        inviter: inviter.map(|inviter| inviter.username),
        message: invite.message.clone(),
    })
}

/// The signup form, prefilled from the session and the invite
#[instrument(skip(app, session))]
pub(crate) async fn new(
    Extension(app): Extension<SharedState>,
    session: Session,
    Query(query): Query<TokenQuery>,
) -> Result<Page<SignupPage>, ApiError> {
    let gate = pass_signup_gate(&app, &session, query.token).await?;

    let mut form = session
        .get(|state| state.user_params.clone())
        .await
        .unwrap_or_default();
    let invite = match &gate.invite {
        Some(invite) => {
            let token = invite.token.clone();
            session
                .update(|state| state.invite_token = Some(token))
                .await;
            form.email = Some(invite.email.clone());
            Some(invite_info(app.store.as_ref(), invite).await?)
        }
        None => None,
    };

    Ok(Page::new(
        session.notice().await,
        SignupPage {
            admin_signup: gate.admin_signup,
            user: form,
            invite,
            errors: Vec::new(),
        },
    ))
}

/// A fully validated signup form
struct Signup {
    new_user: NewUser,
    openid_url: Option<String>,
}

fn validate_signup(
    params: UserParams,
    gate: &SignupGate,
    approval_required: bool,
) -> Result<Result<Signup, Vec<FieldError>>, Report> {
    let mut errors = Vec::new();

    let username = match params.username.as_deref().map(str::parse::<Username>) {
        Some(Ok(username)) => Some(username),
        Some(Err(error)) => {
            errors.push(FieldError::new("username", error));
            None
        }
        None => {
            errors.push(FieldError::new("username", "can't be blank"));
            None
        }
    };

    let email = match blank_to_none(params.email).map(|email| email.parse::<EMail>()) {
        Some(Ok(email)) => Some(email),
        Some(Err(error)) => {
            errors.push(FieldError::new("email", error));
            None
        }
        None => None,
    };

    let password = validate_password(
        params.password.as_ref(),
        params.password_confirmation.as_ref(),
        true,
        &mut errors,
    );

    let (Some(username), Some(password), true) = (username, password, errors.is_empty()) else {
        return Ok(Err(errors));
    };

    let new_user = NewUser {
        username,
        email,
        password_hash: password.hash().wrap_err("Hashing password")?.to_string(),
        realname: blank_to_none(params.realname),
        location: blank_to_none(params.location),
        description: blank_to_none(params.description),
        website: blank_to_none(params.website),
        gamertag: blank_to_none(params.gamertag),
        twitter: blank_to_none(params.twitter),
        inviter_id: gate.invite.as_ref().map(|invite| invite.user_id),
        activated: !approval_required || gate.admin_signup,
        admin_signup: gate.admin_signup,
    };

    Ok(Ok(Signup {
        new_user,
        openid_url: blank_to_none(params.openid_url),
    }))
}

/// Creates the account and logs the new user in
#[instrument(skip_all)]
pub(crate) async fn create(
    Extension(app): Extension<SharedState>,
    session: Session,
    Query(query): Query<TokenQuery>,
    Json(params): Json<UserParams>,
) -> Result<Response, ApiError> {
    let gate = pass_signup_gate(&app, &session, query.token).await?;
    let cached = params.to_cached();

    let errors = match validate_signup(params, &gate, app.config.forum.signup_approval_required)? {
        Ok(signup) => match app.store.create_user(signup.new_user).await? {
            Ok(user) => return signed_up(&app, &session, gate, user, signup.openid_url).await,
            Err(CreateError::UsernameTaken) => {
                vec![FieldError::new("username", "has already been taken")]
            }
            Err(CreateError::EmailTaken) => {
                vec![FieldError::new("email", "has already been taken")]
            }
            Err(CreateError::NotFirstUser) => vec![FieldError::new(
                "base",
                "Someone else signed up as administrator first, please try again",
            )],
        },
        Err(errors) => errors,
    };

    let invite = match &gate.invite {
        Some(invite) => Some(invite_info(app.store.as_ref(), invite).await?),
        None => None,
    };
    session
        .update(|state| state.user_params = Some(cached.clone()))
        .await;

    Ok((
        StatusCode::UNPROCESSABLE_ENTITY,
        Page::new(
            Some("Could not create your account, please fill in all required fields.".to_owned()),
            SignupPage {
                admin_signup: gate.admin_signup,
                user: cached,
                invite,
                errors,
            },
        ),
    )
        .into_response())
}

async fn signed_up(
    app: &SharedState,
    session: &Session,
    gate: SignupGate,
    user: User,
    openid_url: Option<String>,
) -> Result<Response, ApiError> {
    info!(username = %user.username, admin = user.admin, "User signed up");

    session
        .update(|state| {
            state.user_params = None;
            state.invite_token = None;
        })
        .await;
    if let Some(invite) = gate.invite {
        app.store.delete_invite(invite.id).await?;
    }

    if let Some(email) = &user.email {
        let login_url = app
            .config
            .app
            .base_url
            .join(paths::LOGIN)
            .wrap_err("Building login URL")?;
        if let Err(error) = app
            .mailer
            .send(mail::new_user(&user, email, &login_url))
            .await
        {
            error!(?error, "Could not send welcome mail");
        }
    }

    if !user.activated {
        return Ok(redirect(
            paths::LOGIN,
            "Your account has been created and is awaiting approval.",
        ));
    }
    session.authenticate(user.id).await;

    let profile = paths::user(&user.username);
    let Some(openid_url) = openid_url else {
        return Ok(redirect_with_notice(&profile, None));
    };

    let provider = start_openid_session(
        app.openid.as_ref(),
        session,
        &app.config.app.base_url,
        &openid_url,
        paths::update_openid(&user.username),
        paths::edit_user_page(&user.username, EditPage::Settings),
    )
    .await?;

    Ok(match provider {
        Some(provider) => Redirect::to(provider.as_str()).into_response(),
        None => redirect(&profile, "WARNING: Your OpenID URL is invalid!"),
    })
}
