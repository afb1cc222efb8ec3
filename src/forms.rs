//! Raw form input for the user forms
//!
//! Nothing in here is validated, see the signup & profile routes for that.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{responses::FieldError, types::Password};

/// Fields of the signup & profile form
///
/// Everything is optional so partial updates and half filled signup forms
/// deserialize fine, validation happens afterwards so the visitor gets the
/// form back with all errors at once.
#[allow(clippy::missing_docs_in_private_items)]
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserParams {
    pub(crate) username: Option<String>,
    pub(crate) realname: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) password: Option<SecretString>,
    pub(crate) password_confirmation: Option<SecretString>,
    pub(crate) openid_url: Option<String>,
    pub(crate) location: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) website: Option<String>,
    pub(crate) gamertag: Option<String>,
    pub(crate) twitter: Option<String>,
    // The fields below are only for user admins
    pub(crate) activated: Option<bool>,
    pub(crate) banned: Option<bool>,
    /// Days of a temporary ban from now, `0` lifts it
    pub(crate) ban_days: Option<i64>,
    pub(crate) trusted: Option<bool>,
    pub(crate) user_admin: Option<bool>,
    pub(crate) available_invites: Option<i32>,
    // Admins only
    pub(crate) admin: Option<bool>,
}

impl UserParams {
    /// Drops everything a user may not change about themselves
    ///
    /// Username changes are left to user admins too, the name is part of
    /// every profile URL.
    pub(crate) fn safe_attributes(self) -> Self {
        Self {
            username: None,
            activated: None,
            banned: None,
            ban_days: None,
            trusted: None,
            user_admin: None,
            available_invites: None,
            admin: None,
            ..self
        }
    }

    /// What survives in the session between the signup form and its
    /// submission: no passwords, no privileged fields
    pub(crate) fn to_cached(&self) -> CachedUserParams {
        CachedUserParams {
            username: self.username.clone(),
            realname: self.realname.clone(),
            email: self.email.clone(),
            openid_url: self.openid_url.clone(),
            location: self.location.clone(),
            description: self.description.clone(),
            website: self.website.clone(),
            gamertag: self.gamertag.clone(),
            twitter: self.twitter.clone(),
        }
    }
}

/// Prefilled values of the signup form, kept in the session
#[allow(clippy::missing_docs_in_private_items)]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct CachedUserParams {
    pub(crate) username: Option<String>,
    pub(crate) realname: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) openid_url: Option<String>,
    pub(crate) location: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) website: Option<String>,
    pub(crate) gamertag: Option<String>,
    pub(crate) twitter: Option<String>,
}

/// Trimmed, `None` if nothing is left
pub(crate) fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Checks a new password against its confirmation
///
/// A missing or empty password is only an error if `required`, otherwise
/// it means "keep the old one".
pub(crate) fn validate_password(
    password: Option<&SecretString>,
    confirmation: Option<&SecretString>,
    required: bool,
    errors: &mut Vec<FieldError>,
) -> Option<Password> {
    let password = password
        .map(ExposeSecret::expose_secret)
        .filter(|password| !password.trim().is_empty());
    let Some(password) = password else {
        if required {
            errors.push(FieldError::new("password", "can't be blank"));
        }
        return None;
    };

    let confirmed = confirmation.map_or(false, |confirmation| {
        confirmation.expose_secret() == password
    });
    if !confirmed {
        errors.push(FieldError::new(
            "password_confirmation",
            "doesn't match password",
        ));
    }

    match password.parse::<Password>() {
        Ok(password) => confirmed.then_some(password),
        Err(error) => {
            errors.push(FieldError::new("password", error));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{blank_to_none, validate_password, UserParams};

    #[test]
    fn safe_attributes_keep_profile_fields_only() {
        let params: UserParams = serde_json::from_value(serde_json::json!({
            "username": "new name",
            "location": "Memphis",
            "admin": true,
            "user_admin": true,
            "banned": false,
            "available_invites": 10,
        }))
        .unwrap();

        let safe = params.safe_attributes();
        assert_eq!(safe.location.as_deref(), Some("Memphis"));
        assert!(safe.username.is_none());
        assert!(safe.admin.is_none());
        assert!(safe.user_admin.is_none());
        assert!(safe.banned.is_none());
        assert!(safe.available_invites.is_none());
    }

    #[test]
    fn cached_params_never_contain_passwords() {
        let params: UserParams = serde_json::from_value(serde_json::json!({
            "username": "elvis",
            "password": "correct horse battery",
        }))
        .unwrap();

        let cached = serde_json::to_value(params.to_cached()).unwrap();
        assert_eq!(cached["username"], "elvis");
        assert!(cached.get("password").is_none());
    }

    #[test]
    fn blank_values_are_dropped() {
        assert_eq!(blank_to_none(Some("  ".to_owned())), None);
        assert_eq!(blank_to_none(Some(" x ".to_owned())).as_deref(), Some("x"));
        assert_eq!(blank_to_none(None), None);
    }

    #[test]
    fn passwords_need_a_matching_confirmation() {
        let secret = |s: &str| SecretString::new(s.to_owned());
        let mut errors = Vec::new();

        assert!(validate_password(None, None, false, &mut errors).is_none());
        assert!(errors.is_empty());

        assert!(validate_password(None, None, true, &mut errors).is_none());
        assert_eq!(errors.pop().map(|e| e.field), Some("password"));

        let password = secret("long enough password");
        let other = secret("another long password");
        assert!(validate_password(Some(&password), Some(&other), true, &mut errors).is_none());
        assert_eq!(errors.pop().map(|e| e.field), Some("password_confirmation"));

        let short = secret("short");
        assert!(validate_password(Some(&short), Some(&short), true, &mut errors).is_none());
        assert_eq!(errors.pop().map(|e| e.field), Some("password"));

        assert!(validate_password(Some(&password), Some(&password), true, &mut errors).is_some());
        assert!(errors.is_empty());
    }
}
