//! OpenID verification of profile URLs
//!
//! Only the small part of OpenID 2.0 needed to prove that a visitor owns an
//! identifier: discovery via `<link rel="openid2.provider">`, a
//! `checkid_setup` redirect and a `check_authentication` callback check.
//! Anything fancier (associations, Yadis/XRDS, extensions) is left out.

use std::collections::HashMap;

use async_trait::async_trait;
use color_eyre::{eyre::Context, Report};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::session::Session;

const OPENID_NS: &str = "http://specs.openid.net/auth/2.0";

/// Path of the callback the provider sends the visitor back to
pub const COMPLETE_PATH: &str = "/openid/complete";

/// What discovery found out about an identifier
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    /// The identifier being verified, normalized
    pub claimed_id: Url,
    /// The only endpoint allowed to vouch for `claimed_id`
    pub endpoint: Url,
}

/// Result of [OpenIdVerifier::begin]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    #[allow(missing_docs)]
    pub provider: Provider,
    /// Where to send the visitor
    pub redirect: Url,
}

/// Verifies that a visitor controls an OpenID identifier
#[async_trait]
pub trait OpenIdVerifier: Send + Sync + 'static {
    /// Discovers the provider of `identifier` and builds the redirect to it
    ///
    /// `None` if the identifier is not a usable OpenID URL.
    async fn begin(&self, identifier: &str, return_to: &Url)
        -> Result<Option<AuthRequest>, Report>;

    /// Checks the provider's answer, the query of the callback request
    ///
    /// Only `provider` as found by [OpenIdVerifier::begin] may answer, for
    /// the same `return_to`. Returns the verified identifier, `None` on a
    /// negative or forged answer.
    async fn complete(
        &self,
        provider: &Provider,
        return_to: &Url,
        params: &HashMap<String, String>,
    ) -> Result<Option<String>, Report>;
}

/// A verification waiting for the provider, kept in the session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct PendingVerification {
    pub(crate) provider: Provider,
    /// Redirect target once verified
    pub(crate) success: String,
    /// Redirect target if verification fails
    pub(crate) fail: String,
}

/// Starts verifying `identifier`
///
/// Remembers where to continue in the session and returns the provider URL
/// to redirect to, or `None` if the identifier is unusable.
pub(crate) async fn start_openid_session(
    verifier: &dyn OpenIdVerifier,
    session: &Session,
    base_url: &Url,
    identifier: &str,
    success: String,
    fail: String,
) -> Result<Option<Url>, Report> {
    let Some(request) = verifier.begin(identifier, &return_to(base_url)?).await? else {
        return Ok(None);
    };

    session
        .update(|state| {
            state.authenticated_openid_url = None;
            state.pending_openid = Some(PendingVerification {
                provider: request.provider,
                success,
                fail,
            });
        })
        .await;

    Ok(Some(request.redirect))
}

/// The callback URL handed to providers
pub(crate) fn return_to(base_url: &Url) -> Result<Url, Report> {
    base_url
        .join(COMPLETE_PATH)
        .wrap_err("Building OpenID return URL")
}

/// Whether `identifier` names the same URL as `claimed_id`
pub(crate) fn same_identifier(identifier: &str, claimed_id: &Url) -> bool {
    normalize_identifier(identifier).as_ref() == Some(claimed_id)
}

/// Adds `http://` to bare host names, the usual way identifiers are typed
pub(crate) fn normalize_identifier(identifier: &str) -> Option<Url> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return None;
    }
    let url = if identifier.starts_with("http://") || identifier.starts_with("https://") {
        Url::parse(identifier)
    } else {
        Url::parse(&format!("http://{identifier}"))
    }
    .ok()?;

    url.host_str().is_some().then_some(url)
}

/// Value of the `href` of the first `<link>` whose `rel` contains `rel`
fn find_link(html: &str, rel: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut rest = 0;
    while let Some(start) = lower[rest..].find("<link") {
        let start = rest + start;
        let end = start + lower[start..].find('>')?;
        let tag = &html[start..end];
        let tag_lower = &lower[start..end];
        rest = end;

        let Some(rels) = attribute(tag, tag_lower, "rel") else {
            continue;
        };
        if rels.split_whitespace().any(|r| r.eq_ignore_ascii_case(rel)) {
            return attribute(tag, tag_lower, "href");
        }
    }
    None
}

fn attribute(tag: &str, tag_lower: &str, name: &str) -> Option<String> {
    let pattern = format!("{name}=");
    let mut offset = 0;
    loop {
        let found = offset + tag_lower[offset..].find(&pattern)?;
        offset = found + pattern.len();
        let preceded_by_space = tag_lower[..found]
            .chars()
            .last()
            .map_or(false, char::is_whitespace);
        if !preceded_by_space {
            continue;
        }
        let value = &tag[offset..];
        let quote = value.chars().next()?;
        return if quote == '"' || quote == '\'' {
            let value = &value[1..];
            value.find(quote).map(|end| value[..end].to_owned())
        } else {
            value.split_whitespace().next().map(str::to_owned)
        };
    }
}

/// Talks to the provider directly over HTTP
#[derive(Debug, Clone)]
pub struct DirectVerifier {
    client: Client,
    realm: Url,
}

impl DirectVerifier {
    /// `realm` is the trust root shown to the visitor by the provider
    pub fn new(realm: Url) -> Result<Self, Report> {
        let client = Client::builder()
            .user_agent(concat!("pfoertner/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .wrap_err("Building OpenID client")?;
        Ok(Self { client, realm })
    }
}

#[async_trait]
impl OpenIdVerifier for DirectVerifier {
    #[instrument(skip(self))]
    async fn begin(
        &self,
        identifier: &str,
        return_to: &Url,
    ) -> Result<Option<AuthRequest>, Report> {
        let Some(claimed_id) = normalize_identifier(identifier) else {
            debug!("Not a URL");
            return Ok(None);
        };

        let html = match self.client.get(claimed_id.clone()).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                warn!(status = %response.status(), "Discovery failed");
                None
            }
            Err(error) => {
                warn!(%error, "Discovery failed");
                None
            }
        };
        let Some(html) = html else {
            return Ok(None);
        };

        let Some(endpoint) = find_link(&html, "openid2.provider")
            .and_then(|endpoint| claimed_id.join(&endpoint).ok())
        else {
            debug!("No OpenID provider advertised");
            return Ok(None);
        };
        let local_id = find_link(&html, "openid2.local_id").unwrap_or_else(|| claimed_id.to_string());

        let mut redirect = endpoint.clone();
        redirect
            .query_pairs_mut()
            .append_pair("openid.ns", OPENID_NS)
            .append_pair("openid.mode", "checkid_setup")
            .append_pair("openid.claimed_id", claimed_id.as_str())
            .append_pair("openid.identity", &local_id)
            .append_pair("openid.return_to", return_to.as_str())
            .append_pair("openid.realm", self.realm.as_str());

        Ok(Some(AuthRequest {
            provider: Provider {
                claimed_id,
                endpoint,
            },
            redirect,
        }))
    }

    #[instrument(skip(self, params))]
    async fn complete(
        &self,
        provider: &Provider,
        return_to: &Url,
        params: &HashMap<String, String>,
    ) -> Result<Option<String>, Report> {
        let param = |name: &str| params.get(name).map(String::as_str);
        if param("openid.mode") != Some("id_res") {
            debug!(mode = ?param("openid.mode"), "Negative assertion");
            return Ok(None);
        }
        let parsed = |name: &str| param(name).and_then(|value| Url::parse(value).ok());
        if parsed("openid.op_endpoint").as_ref() != Some(&provider.endpoint) {
            warn!(endpoint = ?param("openid.op_endpoint"), "Assertion from another provider");
            return Ok(None);
        }
        if parsed("openid.return_to").as_ref() != Some(return_to) {
            warn!(return_to = ?param("openid.return_to"), "Assertion for another return URL");
            return Ok(None);
        }
        if !param("openid.claimed_id")
            .map_or(false, |claimed_id| same_identifier(claimed_id, &provider.claimed_id))
        {
            warn!(claimed_id = ?param("openid.claimed_id"), "Assertion for another identifier");
            return Ok(None);
        }

        let mut check: HashMap<&str, &str> = params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        check.insert("openid.mode", "check_authentication");

        let body = self
            .client
            .post(provider.endpoint.clone())
            .form(&check)
            .send()
            .await
            .wrap_err("Asking provider to check the assertion")?
            .text()
            .await
            .wrap_err("Reading check_authentication answer")?;

        let valid = body.lines().any(|line| line.trim() == "is_valid:true");
        debug!(valid);
        Ok(valid.then(|| provider.claimed_id.to_string()))
    }
}
