#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report};
use pfoertner::{
    database::{MemoryStore, NewUser, Store, User, UserChanges},
    mail::{Mailer, Message},
    openid::{AuthRequest, OpenIdVerifier, Provider},
    run_server,
    session::MemoryBackend,
    settings::Config,
    types::{EMail, Password, Username},
    AppState,
};
use reqwest::{header::LOCATION, redirect::Policy, Response, StatusCode};
use serde_json::Value;
use tokio::spawn;
use url::Url;

pub const PASSWORD: &str = "correct horse battery";

/// Remembers every mail instead of sending it, or fails like an
/// unreachable mail API once [RecordingMailer::break_down] was called
#[derive(Debug, Default)]
pub struct RecordingMailer {
    messages: Mutex<Vec<Message>>,
    undelivered: Mutex<Vec<Message>>,
    broken: AtomicBool,
}

impl RecordingMailer {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn undelivered(&self) -> Vec<Message> {
        self.undelivered.lock().unwrap().clone()
    }

    pub fn break_down(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: Message) -> Result<(), Report> {
        if self.broken.load(Ordering::SeqCst) {
            self.undelivered.lock().unwrap().push(message);
            return Err(eyre!("Mail API unreachable"));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Accepts identifiers below `https://openid.test/` and takes every
/// positive assertion at its word, like a provider that vouches for
/// whatever it is asked about
#[derive(Debug)]
pub struct StubOpenId;

#[async_trait]
impl OpenIdVerifier for StubOpenId {
    async fn begin(
        &self,
        identifier: &str,
        return_to: &Url,
    ) -> Result<Option<AuthRequest>, Report> {
        if !identifier.starts_with("https://openid.test/") {
            return Ok(None);
        }
        let endpoint = Url::parse("https://provider.test/auth")?;
        let mut redirect = endpoint.clone();
        redirect
            .query_pairs_mut()
            .append_pair("openid.claimed_id", identifier)
            .append_pair("openid.return_to", return_to.as_str());
        Ok(Some(AuthRequest {
            provider: Provider {
                claimed_id: Url::parse(identifier)?,
                endpoint,
            },
            redirect,
        }))
    }

    async fn complete(
        &self,
        _provider: &Provider,
        _return_to: &Url,
        params: &HashMap<String, String>,
    ) -> Result<Option<String>, Report> {
        if params.get("openid.mode").map(String::as_str) != Some("id_res") {
            return Ok(None);
        }
        Ok(params.get("openid.claimed_id").cloned())
    }
}

pub struct TestApp {
    pub address: String,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
}

/// Starts the app on a random port with everything in memory
///
/// `forum` is the `[forum]` section of the config.
pub async fn spawn_app(forum: &str) -> TestApp {
    let toml = format!(
        "[app]\nport = 0\nlisten_on = \"127.0.0.1\"\nbase_url = \"http://forum.test/\"\n\n[forum]\n{forum}\n"
    );
    let config: Config = config::Config::builder()
        .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
        .build()
        .expect("Building config")
        .try_deserialize()
        .expect("Parsing config");

    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState {
        config: Arc::new(config),
        store: store.clone(),
        sessions: Arc::new(MemoryBackend::new()),
        mailer: mailer.clone(),
        openid: Arc::new(StubOpenId),
    };

    let (addr, server) = run_server(state).expect("Failed to create app");
    spawn(async { server.await.expect("Running the server") });

    TestApp {
        address: format!("http://{addr}"),
        store,
        mailer,
    }
}

impl TestApp {
    /// Creates an activated user with [PASSWORD]
    pub async fn user(&self, name: &str, email: Option<&str>) -> User {
        let password: Password = PASSWORD.parse().unwrap();
        self.store
            .create_user(NewUser {
                username: name.parse::<Username>().unwrap(),
                email: email.map(|email| email.parse::<EMail>().unwrap()),
                password_hash: password.hash().unwrap().to_string(),
                realname: None,
                location: None,
                description: None,
                website: None,
                gamertag: None,
                twitter: None,
                inviter_id: None,
                activated: true,
                admin_signup: false,
            })
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn change(&self, user: &User, changes: UserChanges) -> User {
        self.store.update_user(user.id, changes).await.unwrap().unwrap()
    }

    pub async fn find(&self, name: &str) -> User {
        self.store
            .find_user_by_username(name)
            .await
            .unwrap()
            .expect("User exists")
    }

    pub fn browser(&self) -> Browser {
        Browser {
            address: self.address.clone(),
            client: reqwest::Client::builder()
                .redirect(Policy::none())
                .cookie_store(true)
                .build()
                .unwrap(),
        }
    }

    /// A browser logged in as `name`
    pub async fn logged_in(&self, name: &str) -> Browser {
        let browser = self.browser();
        let response = browser
            .post(
                "/users/authenticate",
                serde_json::json!({ "username": name, "password": PASSWORD }),
            )
            .await;
        assert_eq!(location(&response), "/discussions", "Login as {name} failed");
        browser
    }
}

/// A client keeping the session cookie, like a browser would
pub struct Browser {
    address: String,
    client: reqwest::Client,
}

impl Browser {
    async fn send(&self, request: reqwest::RequestBuilder) -> Response {
        request.send().await.expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.send(self.client.get(format!("{}{path}", self.address)))
            .await
    }

    pub async fn post(&self, path: &str, json: Value) -> Response {
        self.send(self.client.post(format!("{}{path}", self.address)).json(&json))
            .await
    }

    pub async fn patch(&self, path: &str, json: Value) -> Response {
        self.send(self.client.patch(format!("{}{path}", self.address)).json(&json))
            .await
    }

    /// Follows a redirect, returning the rendered page
    pub async fn follow(&self, response: Response) -> (StatusCode, Value) {
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let response = self.get(&location(&response)).await;
        page(response).await
    }
}

pub fn location(response: &Response) -> String {
    assert_eq!(
        response.status(),
        StatusCode::SEE_OTHER,
        "Expected a redirect"
    );
    response.headers()[LOCATION].to_str().unwrap().to_owned()
}

pub async fn page(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.json().await.expect("Page is JSON");
    (status, body)
}
