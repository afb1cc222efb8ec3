//! Loading settings from files and environment
use std::{collections::HashSet, net::IpAddr, str::FromStr};

use color_eyre::eyre::Context;
use config::{Environment, File};
use serde::Deserialize;
use sqlx::{postgres::PgConnectOptions, ConnectOptions};
use url::Url;

/// Config for PostgreSQL Connection
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DbConfig {
    /// Connect using a Database URL
    DatabaseUrl {
        /// The connection url for including password, username, db, etc.
        url: String,
    },
    /// Connect using different parameters
    Parameters {
        #[allow(missing_docs)]
        username: String,
        #[allow(missing_docs)]
        password: String,
        #[allow(missing_docs)]
        host: String,
        #[allow(missing_docs)]
        port: Option<u16>,
        #[allow(missing_docs)]
        db_name: Option<String>,
    },
}

impl TryInto<PgConnectOptions> for &DbConfig {
    type Error = <PgConnectOptions as FromStr>::Err;

    fn try_into(self) -> Result<PgConnectOptions, Self::Error> {
        match self {
            DbConfig::DatabaseUrl { url } => url.parse(),
            DbConfig::Parameters {
                username,
                password,
                host,
                port,
                db_name,
            } => {
                let mut options = PgConnectOptions::new()
                    .username(username)
                    .password(password)
                    .host(host);
                if let Some(port) = port {
                    options = options.port(*port);
                }
                if let Some(db_name) = db_name {
                    options = options.database(db_name);
                }

                options.log_statements(tracing::log::LevelFilter::Trace);
                Ok(options)
            }
        }
    }
}

fn default_port() -> u16 {
    3779
}

fn default_listen_on() -> IpAddr {
    IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1])
}

fn default_base_url() -> Url {
    Url::parse("http://localhost:3779").expect("Constant URL is valid")
}

fn default_discussions_path() -> String {
    "/discussions".to_owned()
}

/// General app config
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Used by CORS middleware, should include all origins the app
    /// is supposed to run on - does not support any kind of regex at
    /// the moment
    #[serde(default)]
    pub allowed_origins: HashSet<Url>,
    /// If set all localhost origins are considered valid CORS origins
    /// Usefull for development, should be deactivated in production.
    #[serde(default = "false_default")]
    pub allow_localhost: bool,

    /// The IP the server is listening on
    #[serde(default = "default_listen_on")]
    pub listen_on: IpAddr,

    /// The port the server is going to listen to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public URL of the forum, used for links in mails and the OpenID
    /// `return_to` address
    #[serde(default = "default_base_url")]
    pub base_url: Url,

    /// Where logged in users are sent, lives outside of this service
    #[serde(default = "default_discussions_path")]
    pub discussions_path: String,
}

fn default_invite_expiry_days() -> i64 {
    14
}

/// Forum policies deciding who may sign up and what anonymous visitors see
#[derive(Debug, Deserialize)]
pub struct ForumConfig {
    /// Anyone may sign up without an invite
    #[serde(default = "false_default")]
    pub signups_allowed: bool,
    /// New accounts need to be activated by a user admin
    #[serde(default = "false_default")]
    pub signup_approval_required: bool,
    /// Anonymous visitors may read user pages
    #[serde(default = "false_default")]
    pub public_browsing: bool,
    /// Days until an unused invite expires
    #[serde(default = "default_invite_expiry_days")]
    pub invite_expiry_days: i64,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            signups_allowed: false,
            signup_approval_required: false,
            public_browsing: false,
            invite_expiry_days: default_invite_expiry_days(),
        }
    }
}

/// Configuring redis connection
#[derive(Debug, Deserialize)]
pub struct RedisConfig {
    /// The URL
    pub url: Url,
}

fn default_sender() -> String {
    "noreply@localhost".to_owned()
}

/// Outgoing mail
///
/// Without an `api_url` mails are only logged, which is fine for development.
#[derive(Debug, Deserialize)]
pub struct MailConfig {
    /// Sender address of all mails
    #[serde(default = "default_sender")]
    pub from: String,
    /// JSON mail API accepting `{from, to, subject, text}`
    pub api_url: Option<Url>,
    /// Bearer token for the mail API
    pub api_key: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_sender(),
            api_url: None,
            api_key: None,
        }
    }
}

/// Collection of all config areas
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Config affecting the database connection, in-memory storage if missing
    pub database: Option<DbConfig>,
    /// General application config
    pub app: AppConfig,
    /// Signup and browsing policies
    #[serde(default)]
    pub forum: ForumConfig,
    /// Config for the redis connection, in-memory sessions if missing
    pub redis: Option<RedisConfig>,
    /// Config for sending mails
    #[serde(default)]
    pub mail: MailConfig,
}

/// Reads config from config.toml + environment
///
/// For a documentation of possible values see the docs of
/// [Config], env values require a prefix of `PF` and nestings
/// are separated by `__`
pub fn read_config() -> color_eyre::Result<Config> {
    let conf = config::Config::builder()
        .add_source(File::with_name("config.toml").required(false))
        .add_source(
            Environment::with_prefix("PF")
                .separator("__")
                .prefix_separator("_"),
        )
        .build()
        .wrap_err("Reading the config")?;

    conf.try_deserialize().wrap_err("Parsing the config")
}

/// Proxy for serde default
///
/// This is needed since Serde only supports paths right now as default
/// values, see:
/// <https://github.com/serde-rs/serde/issues/368>
fn false_default() -> bool {
    false
}
