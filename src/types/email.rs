use core::fmt;
use std::{ops::Deref, str::FromStr};

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};

/// Safely store & validate emails
///
/// Only allows valid emails in the sense of the webspec for the input[type=email]
/// field, this allows any commond email while forbidding things like comments etc.
/// Emails are compared lowercase, so they are stored that way too.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct EMail(String);

impl FromStr for EMail {
    type Err = Report;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if validator::validate_email(s) {
            Ok(Self(s.to_lowercase()))
        } else {
            Err(eyre!(
                "{s:?} is not a valid email address according to the HTML 5 Spec",
            ))
        }
    }
}

impl TryFrom<String> for EMail {
    type Error = Report;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EMail> for String {
    fn from(email: EMail) -> Self {
        email.0
    }
}

impl AsRef<str> for EMail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for EMail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for EMail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for EMail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::EMail;
    use proptest::proptest;

    #[test]
    fn empty_string_is_rejected() {
        let _ = "".parse::<EMail>().unwrap_err();
    }

    #[test]
    fn email_missing_at_symbol_is_rejected() {
        let _ = "your-domain.de".parse::<EMail>().unwrap_err();
    }

    #[test]
    fn email_missing_subject_is_rejected() {
        let _ = "@my-domain.com".parse::<EMail>().unwrap_err();
    }

    #[test]
    fn emails_are_lowercased() {
        let email = " Someone@Example.COM ".parse::<EMail>().unwrap();
        assert_eq!(&*email, "someone@example.com");
    }

    proptest! {
        #[test]
        fn email_parsing_does_not_crash(s in r#"\p{Cc}*"#) {
            let _ = s.parse::<EMail>();
        }

        // Regex is taken form the HTML 5 Spec +
        // length boundaries (64 for local part, 255 for domain) from RFC5321
        #[test]
        fn valid_emails_are_parsed_successfully(valid_email in r#"[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]{1,64}@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?){0,3}"#) {
            let _ = valid_email.parse::<EMail>().unwrap();
        }
    }
}
