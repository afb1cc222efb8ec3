use std::str::FromStr;

use argon2::{
    password_hash::{self, rand_core::OsRng, PasswordHashString, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use color_eyre::{eyre::eyre, Report};
use rand::{distributions::Alphanumeric, Rng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Length of passwords handed out by [Password::generate]
const GENERATED_LENGTH: usize = 12;

/// Safely store passwords
///
/// Prevents logging or plain-text comparision, ensures that the minimum
/// length of 10 bytes is followed
///
///
/// This is safer then always remember to `skip` the private details in
/// for example [macro@tracing::instrument]
#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct Password(SecretString);

impl FromStr for Password {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 10 {
            Err(eyre!("is shorter than 10 characters/bytes"))
        } else if s.len() > 256 {
            Err(eyre!("is longer than 256 characters/bytes"))
        } else {
            Ok(Self(s.to_owned().into()))
        }
    }
}

impl TryFrom<String> for Password {
    type Error = <Password as FromStr>::Err;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Password {
    /// A fresh random alphanumeric password, used for mailed resets
    pub fn generate() -> Self {
        let plain: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_LENGTH)
            .map(char::from)
            .collect();
        Self(plain.into())
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Argon2 hash in PHC string format
    pub fn hash(&self) -> Result<PasswordHashString, Report> {
        let argon2 = Argon2::default();
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2.hash_password(self.expose().as_bytes(), &salt)?;

        Ok(hash.serialize())
    }

    /// Checks the password against a stored hash
    ///
    /// A mismatch is `Ok(false)`, only a broken hash is an error.
    pub fn match_hash(&self, hash: &str) -> Result<bool, Report> {
        let hash = PasswordHash::new(hash)?;

        Argon2::default()
            .verify_password(self.expose().as_bytes(), &hash)
            .map(|_| true)
            .or_else(|e| match e {
                password_hash::Error::Password => Ok(false),
                e => Err(e.into()),
            })
    }
}

#[cfg(test)]
mod tests {
    use proptest::proptest;

    use super::Password;

    #[test]
    fn empty_password_is_rejected() {
        let _ = "".parse::<Password>().unwrap_err();
    }

    #[test]
    fn hash_matches_only_the_same_password() {
        let password = "correct horse battery".parse::<Password>().unwrap();
        let hash = password.hash().unwrap();

        assert!(password.match_hash(hash.as_str()).unwrap());
        let other = "incorrect horse battery".parse::<Password>().unwrap();
        assert!(!other.match_hash(hash.as_str()).unwrap());
    }

    #[test]
    fn broken_hash_is_an_error() {
        let password = "correct horse battery".parse::<Password>().unwrap();
        let _ = password.match_hash("not a phc string").unwrap_err();
    }

    #[test]
    fn generated_passwords_are_valid_passwords() {
        let generated = Password::generate();
        assert_eq!(generated.expose().len(), 12);
        let _ = generated.expose().parse::<Password>().unwrap();
    }

    proptest! {
        #[test]
        fn whitespace_only_is_rejected(ws in r#"\s*"#) {
            let _ = ws.parse::<Password>().unwrap_err();
        }

        // Note that we only test short ascii password since the server
        // checks for byte length. This is actually intendened since in
        // some languages short passwords already give good entropy.
        #[test]
        fn short_passwords_are_rejected(short in r#"\p{ascii}{0, 9}"#) {
            let _ = short.parse::<Password>().unwrap_err();
        }

        #[test]
        fn allow_64_4_byte_scalars(s in r#"\p{Cuneiform}{64}"#) {
            let _ = s.parse::<Password>().unwrap();
        }
    }
}
