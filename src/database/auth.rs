//! Checking credentials
//!
//! This is the only file that is supposed to see and
//! interact with the passwords saved in the database.
//! Limiting this to this file allows easier changes
//! to hashing algorithms, security updates and helps
//! hiding passwords from attackers

use color_eyre::Report;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::types::Password;

use super::{Store, User};

/// Expected errors during login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginError {
    /// User has not been found
    ///
    /// The login form does not tell this apart from a wrong password
    UserNotFound,
    /// Wrong password, or one that could never have been set
    InvalidCredentials,
    /// The account waits for a user admin to activate it
    NotActivated,
    /// Banned permanently or temporarily
    Banned,
}

/// Unhashed Login Credentials
#[derive(Deserialize, Debug)]
pub(crate) struct Credentials {
    // Self-explanatory, doc would just be noise
    #[allow(clippy::missing_docs_in_private_items)]
    pub(crate) username: String,
    /// Unhashed password
    pub(crate) password: SecretString,
}

/// Checks credentials and returns user
///
/// The double result is used as always:
/// The outside result contains unexpected errors, the inner the expected ones
/// This function properly differentiates between a user not existing and
/// a credentials being wrong, see [LoginError] for details.
#[tracing::instrument(skip(store))]
pub(crate) async fn check_credentials_and_get_user(
    store: &dyn Store,
    credentials: &Credentials,
) -> Result<Result<User, LoginError>, Report> {
    let Some(user) = store.find_user_by_username(credentials.username.trim()).await? else {
        // Expected error, so outer Ok
        return Ok(Err(LoginError::UserNotFound));
    };
    let Some(hash) = store.password_hash(user.id).await? else {
        return Ok(Err(LoginError::UserNotFound));
    };

    // Anything the password rules reject can't be the stored password
    let Ok(password) = credentials.password.expose_secret().parse::<Password>() else {
        return Ok(Err(LoginError::InvalidCredentials));
    };

    if !password.match_hash(&hash)? {
        return Ok(Err(LoginError::InvalidCredentials));
    }

    if user.is_banned(OffsetDateTime::now_utc()) {
        Ok(Err(LoginError::Banned))
    } else if !user.activated {
        Ok(Err(LoginError::NotActivated))
    } else {
        Ok(Ok(user))
    }
}
