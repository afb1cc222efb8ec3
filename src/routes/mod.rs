//! All final request handlers
//!
//! These handlers return the actual responses, semantically grouped
pub(crate) mod healthcheck;
pub(crate) mod invites;
pub(crate) mod login;
pub(crate) mod openid;
pub(crate) mod profile;
pub(crate) mod reset;
pub(crate) mod signup;
pub(crate) mod users;

/// Locations the handlers redirect to
pub(crate) mod paths {
    use crate::guards::EditPage;

    pub(crate) const USERS: &str = "/users";
    pub(crate) const NEW_USER: &str = "/users/new";
    pub(crate) const LOGIN: &str = "/users/login";
    pub(crate) const PASSWORD_RESET: &str = "/users/password_reset";

    /// Usernames may contain anything a path segment may not
    pub(crate) fn user(username: &str) -> String {
        format!("{USERS}/{}", urlencoding::encode(username))
    }

    pub(crate) fn edit_user(username: &str) -> String {
        format!("{}/edit", user(username))
    }

    pub(crate) fn edit_user_page(username: &str, page: EditPage) -> String {
        format!("{}?page={}", edit_user(username), page.as_str())
    }

    pub(crate) fn update_openid(username: &str) -> String {
        format!("{}/update_openid", user(username))
    }

}
