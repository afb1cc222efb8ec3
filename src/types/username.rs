use core::fmt;
use std::{ops::Deref, str::FromStr};

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};

/// Path segments below `/users` which are actions, not profiles
const RESERVED: &[&str] = &[
    "new",
    "login",
    "authenticate",
    "logout",
    "password_reset",
    "deliver_password",
    "banned",
    "recently_joined",
    "online",
    "admins",
    "xboxlive",
    "social",
    "top_posters",
    "trusted",
];

/// The public, unique name of an account
///
/// Usernames show up in profile URLs, so besides the usual checks they may
/// not contain slashes or collide with one of the listing routes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl FromStr for Username {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| c.is_control()) {
            return Err(eyre!("can't contain control characters"));
        }
        let s = s.trim();
        if s.is_empty() {
            Err(eyre!("can't be empty"))
        } else if s.chars().count() > 40 {
            Err(eyre!("can't be longer than 40 characters"))
        } else if s.contains(['/', '?']) {
            Err(eyre!("can't contain slashes or question marks"))
        } else if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(s)) {
            Err(eyre!("{s:?} is reserved"))
        } else {
            Ok(Self(s.into()))
        }
    }
}

impl TryFrom<String> for Username {
    type Error = Report;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
