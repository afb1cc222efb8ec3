//! All methods to talk to the database reside here.
//!
//! This makes any changes to tables, relations etc. easier. Handlers only
//! see the [Store] trait, which is implemented for PostgreSQL and for an
//! in-memory map used by tests and local development.

pub(crate) mod auth;
pub(crate) mod memory;
mod postgres;

use async_trait::async_trait;
use color_eyre::Report;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::types::{EMail, Username};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// How long after the last request a user still counts as online
pub(crate) const ONLINE_WINDOW: Duration = Duration::minutes(15);

/// This directly mirrors the `users` table, expect for the password
/// column, since we don't want to return a password on accident
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub realname: Option<String>,
    /// Private, only the edit page shows it
    #[serde(skip_serializing)]
    pub email: Option<String>,
    pub admin: bool,
    pub user_admin: bool,
    pub trusted: bool,
    pub activated: bool,
    pub banned: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub banned_until: Option<OffsetDateTime>,
    pub openid_url: Option<String>,
    pub available_invites: i32,
    pub inviter_id: Option<Uuid>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub gamertag: Option<String>,
    pub twitter: Option<String>,
    pub posts_count: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_active: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// Admins are always user admins as well
    pub fn is_user_admin(&self) -> bool {
        self.user_admin || self.admin
    }

    /// Trusted users see the trusted posts & discussions
    pub fn is_trusted(&self) -> bool {
        self.trusted || self.is_user_admin()
    }

    /// Permanently banned or inside a temporary ban
    pub fn is_banned(&self, now: OffsetDateTime) -> bool {
        self.banned || self.banned_until.map_or(false, |until| until > now)
    }

    /// Active inside the [ONLINE_WINDOW]
    pub fn is_online(&self, now: OffsetDateTime) -> bool {
        self.last_active
            .map_or(false, |last| now - last < ONLINE_WINDOW)
    }
}

/// Everything needed to insert a user, already validated
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Debug)]
pub struct NewUser {
    pub username: Username,
    pub email: Option<EMail>,
    /// Argon2 PHC string
    pub password_hash: String,
    pub realname: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub gamertag: Option<String>,
    pub twitter: Option<String>,
    pub inviter_id: Option<Uuid>,
    pub activated: bool,
    /// Create the first account as administrator
    ///
    /// Only succeeds while the user table is empty, see
    /// [CreateError::NotFirstUser]
    pub admin_signup: bool,
}

/// The known errors which can occur when calling [Store::create_user]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// Some user already has this name (case insensitive)
    UsernameTaken,
    /// Some user already has this email
    EmailTaken,
    /// An admin signup lost against another signup
    NotFirstUser,
}

/// A partial update of a user
///
/// `None` leaves a column alone. For the optional text columns an empty
/// string clears the column.
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Debug, Default)]
pub struct UserChanges {
    pub username: Option<Username>,
    pub realname: Option<String>,
    /// Already validated and lowercased, empty clears
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub gamertag: Option<String>,
    pub twitter: Option<String>,
    pub admin: Option<bool>,
    pub user_admin: Option<bool>,
    pub trusted: Option<bool>,
    pub activated: Option<bool>,
    pub banned: Option<bool>,
    pub banned_until: Option<Option<OffsetDateTime>>,
    pub available_invites: Option<i32>,
}

/// The known errors which can occur when calling [Store::update_user]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// The user vanished between loading and updating
    NotFound,
    /// Renaming to a name that is in use
    UsernameTaken,
    /// Changing to an email that is in use
    EmailTaken,
}

/// The predefined user listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserList {
    /// Activated and not banned, by username
    Active,
    /// Banned permanently or temporarily, by username
    Banned,
    /// The 25 newest accounts
    RecentlyJoined,
    /// Seen inside [ONLINE_WINDOW], by username
    Online,
    /// Admins and user admins, by username
    Admins,
    /// Users with a gamertag, by username
    XboxLive,
    /// Users with a twitter handle, by username
    Social,
    /// The 50 users with most posts
    TopPosters,
    /// Trusted users, admins and user admins, by username
    Trusted,
}

impl UserList {
    /// Maximum number of entries, for the lists that have one
    pub fn limit(self) -> Option<usize> {
        match self {
            UserList::RecentlyJoined => Some(25),
            UserList::TopPosters => Some(50),
            _ => None,
        }
    }
}

/// A token letting someone sign up while signups are closed
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Invite {
    pub id: Uuid,
    pub token: String,
    /// The inviting user
    pub user_id: Uuid,
    pub email: String,
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Invite {
    #[allow(missing_docs)]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// A validated invite about to be created
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Debug)]
pub struct NewInvite {
    pub inviter: Uuid,
    /// User admins don't use up their invites
    pub unlimited: bool,
    pub email: EMail,
    pub message: Option<String>,
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// The known errors which can occur when calling [Store::create_invite]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteError {
    /// The inviter has no invites left
    NoInvitesLeft,
    /// The invitee already has an account
    AlreadyRegistered,
}

/// A post as far as the profile pages care
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub discussion_id: Uuid,
    pub body: String,
    /// Posted in a trusted discussion
    pub trusted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Post count of a single ISO week
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Debug, Serialize, PartialEq, Eq, sqlx::FromRow)]
pub struct WeeklyPosts {
    pub year: i32,
    pub week: i32,
    pub post_count: i64,
}

/// Page of a paginated listing, 1-based
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    #[allow(missing_docs)]
    pub page: u32,
    #[allow(missing_docs)]
    pub per_page: u32,
}

impl Paging {
    /// Rows to skip
    pub fn offset(self) -> u32 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// Persistence of users, invites and the read side of posts
///
/// The double results are used as always: the outer result contains
/// unexpected errors, the inner one the expected ones.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Number of registered users
    async fn count_users(&self) -> Result<i64, Report>;

    #[allow(missing_docs)]
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Report>;

    /// Case insensitive lookup
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, Report>;

    #[allow(missing_docs)]
    async fn find_user_by_email(&self, email: &EMail) -> Result<Option<User>, Report>;

    /// The stored argon2 hash, only to be used by [auth]
    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, Report>;

    #[allow(missing_docs)]
    async fn list_users(&self, list: UserList) -> Result<Vec<User>, Report>;

    /// Inserts a user, see [NewUser::admin_signup] for the admin bootstrap
    async fn create_user(&self, new_user: NewUser) -> Result<Result<User, CreateError>, Report>;

    #[allow(missing_docs)]
    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Result<User, UpdateError>, Report>;

    /// Saves a verified OpenID URL, false if the user does not exist
    async fn set_openid_url(&self, id: Uuid, openid_url: &str) -> Result<bool, Report>;

    /// Records activity for the online list
    async fn touch_user(&self, id: Uuid, at: OffsetDateTime) -> Result<(), Report>;

    /// One more available invite
    async fn grant_invite(&self, id: Uuid) -> Result<Option<User>, Report>;

    /// No available invites left
    async fn revoke_invites(&self, id: Uuid) -> Result<Option<User>, Report>;

    #[allow(missing_docs)]
    async fn find_invite(&self, token: &str) -> Result<Option<Invite>, Report>;

    /// Creates an invite, replacing any earlier invite for the same email
    /// and using up one of the inviter's invites unless
    /// [NewInvite::unlimited] is set
    async fn create_invite(
        &self,
        new_invite: NewInvite,
    ) -> Result<Result<Invite, InviteError>, Report>;

    /// Consumes an invite
    async fn delete_invite(&self, id: Uuid) -> Result<(), Report>;

    /// Newest first, trusted posts only with `include_trusted`
    async fn posts_by_user(
        &self,
        user_id: Uuid,
        paging: Paging,
        include_trusted: bool,
    ) -> Result<Vec<Post>, Report>;

    /// Ordered by year and week
    async fn posts_per_week(&self, user_id: Uuid) -> Result<Vec<WeeklyPosts>, Report>;
}

#[cfg(test)]
mod tests {
    use time::{Duration, OffsetDateTime};

    use super::Paging;
    use crate::database::memory::tests::user;

    #[test]
    fn paging_starts_at_one() {
        assert_eq!(Paging { page: 0, per_page: 15 }.offset(), 0);
        assert_eq!(Paging { page: 1, per_page: 15 }.offset(), 0);
        assert_eq!(Paging { page: 3, per_page: 15 }.offset(), 30);
    }

    #[test]
    fn temporary_bans_run_out() {
        let now = OffsetDateTime::now_utc();
        let mut banned = user("bart");
        banned.banned_until = Some(now + Duration::days(1));
        assert!(banned.is_banned(now));
        assert!(!banned.is_banned(now + Duration::days(2)));
    }

    #[test]
    fn admins_are_trusted_user_admins() {
        let mut admin = user("root");
        admin.admin = true;
        assert!(admin.is_user_admin());
        assert!(admin.is_trusted());
        assert!(!user("guest").is_trusted());
    }

    #[test]
    fn online_means_recently_active() {
        let now = OffsetDateTime::now_utc();
        let mut someone = user("someone");
        assert!(!someone.is_online(now));
        someone.last_active = Some(now - Duration::minutes(5));
        assert!(someone.is_online(now));
        someone.last_active = Some(now - Duration::minutes(20));
        assert!(!someone.is_online(now));
    }
}
