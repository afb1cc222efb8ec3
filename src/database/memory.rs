//! In-memory [Store]
//!
//! Used when no database is configured and by the test suites. A single
//! write lock per mutation gives the same atomicity the PostgreSQL store
//! gets from its transactions.

use std::{cmp::Reverse, collections::HashMap};

use async_trait::async_trait;
use color_eyre::Report;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CreateError, Invite, InviteError, NewInvite, NewUser, Paging, Post, Store, UpdateError,
    User, UserChanges, UserList, WeeklyPosts,
};
use crate::types::EMail;

/// Same comparison as the `lower(username)` index
fn same_username(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    password_hashes: HashMap<Uuid, String>,
    invites: Vec<Invite>,
    posts: Vec<Post>,
}

impl Tables {
    fn username_taken(&self, username: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| Some(u.id) != except && same_username(&u.username, username))
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .iter()
            .any(|u| Some(u.id) != except && u.email.as_deref() == Some(email))
    }

    fn user_mut(&mut self, id: Uuid) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }
}

/// Non persistent storage, everything is lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts are written by the discussion side of the forum, this is how
    /// they get here without it
    pub async fn add_post(&self, post: Post) {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.user_mut(post.user_id) {
            user.posts_count += 1;
        }
        tables.posts.push(post);
    }
}

/// `Some("")` clears, `Some(value)` sets, `None` keeps
fn apply_text(column: &mut Option<String>, change: Option<String>) {
    if let Some(value) = change {
        *column = (!value.is_empty()).then_some(value);
    }
}

fn by_username(mut users: Vec<User>) -> Vec<User> {
    users.sort_by_key(|u| u.username.to_lowercase());
    users
}

#[async_trait]
impl Store for MemoryStore {
    async fn count_users(&self) -> Result<i64, Report> {
        Ok(i64::try_from(self.tables.read().await.users.len())?)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Report> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, Report> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| same_username(&u.username, username))
            .cloned())
    }

    async fn find_user_by_email(&self, email: &EMail) -> Result<Option<User>, Report> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(&**email))
            .cloned())
    }

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, Report> {
        Ok(self.tables.read().await.password_hashes.get(&id).cloned())
    }

    async fn list_users(&self, list: UserList) -> Result<Vec<User>, Report> {
        let now = OffsetDateTime::now_utc();
        let users = self.tables.read().await.users.clone();
        let filtered = |keep: fn(&User, OffsetDateTime) -> bool| {
            users
                .iter()
                .filter(|u| keep(u, now))
                .cloned()
                .collect::<Vec<_>>()
        };

        let mut result = match list {
            UserList::Active => {
                by_username(filtered(|u, now| u.activated && !u.is_banned(now)))
            }
            UserList::Banned => by_username(filtered(|u, now| u.is_banned(now))),
            UserList::Online => by_username(filtered(|u, now| u.is_online(now))),
            UserList::Admins => by_username(filtered(|u, _| u.is_user_admin())),
            UserList::XboxLive => by_username(filtered(|u, _| u.gamertag.is_some())),
            UserList::Social => by_username(filtered(|u, _| u.twitter.is_some())),
            UserList::Trusted => by_username(filtered(|u, _| u.is_trusted())),
            UserList::RecentlyJoined => {
                let mut users = filtered(|u, _| u.activated);
                users.sort_by_key(|u| Reverse(u.created_at));
                users
            }
            UserList::TopPosters => {
                let mut users = filtered(|u, _| u.activated);
                users.sort_by_key(|u| Reverse(u.posts_count));
                users
            }
        };
        if let Some(limit) = list.limit() {
            result.truncate(limit);
        }

        Ok(result)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<Result<User, CreateError>, Report> {
        let mut tables = self.tables.write().await;

        if new_user.admin_signup && !tables.users.is_empty() {
            return Ok(Err(CreateError::NotFirstUser));
        }
        if tables.username_taken(&new_user.username, None) {
            return Ok(Err(CreateError::UsernameTaken));
        }
        if let Some(email) = &new_user.email {
            if tables.email_taken(email, None) {
                return Ok(Err(CreateError::EmailTaken));
            }
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username.into(),
            realname: new_user.realname,
            email: new_user.email.map(Into::into),
            admin: new_user.admin_signup,
            user_admin: false,
            trusted: false,
            activated: new_user.activated,
            banned: false,
            banned_until: None,
            openid_url: None,
            available_invites: 0,
            inviter_id: new_user.inviter_id,
            location: new_user.location,
            description: new_user.description,
            website: new_user.website,
            gamertag: new_user.gamertag,
            twitter: new_user.twitter,
            posts_count: 0,
            last_active: None,
            created_at: OffsetDateTime::now_utc(),
        };
        tables
            .password_hashes
            .insert(user.id, new_user.password_hash);
        tables.users.push(user.clone());

        Ok(Ok(user))
    }

    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Result<User, UpdateError>, Report> {
        let mut tables = self.tables.write().await;

        if !tables.users.iter().any(|u| u.id == id) {
            return Ok(Err(UpdateError::NotFound));
        }
        if let Some(username) = &changes.username {
            if tables.username_taken(username, Some(id)) {
                return Ok(Err(UpdateError::UsernameTaken));
            }
        }
        if let Some(email) = changes.email.as_deref().filter(|e| !e.is_empty()) {
            if tables.email_taken(email, Some(id)) {
                return Ok(Err(UpdateError::EmailTaken));
            }
        }
        if let Some(hash) = changes.password_hash {
            tables.password_hashes.insert(id, hash);
        }

        let Some(user) = tables.user_mut(id) else {
            return Ok(Err(UpdateError::NotFound));
        };

        if let Some(username) = changes.username {
            user.username = username.into();
        }
        apply_text(&mut user.realname, changes.realname);
        apply_text(&mut user.email, changes.email);
        apply_text(&mut user.location, changes.location);
        apply_text(&mut user.description, changes.description);
        apply_text(&mut user.website, changes.website);
        apply_text(&mut user.gamertag, changes.gamertag);
        apply_text(&mut user.twitter, changes.twitter);
        user.admin = changes.admin.unwrap_or(user.admin);
        user.user_admin = changes.user_admin.unwrap_or(user.user_admin);
        user.trusted = changes.trusted.unwrap_or(user.trusted);
        user.activated = changes.activated.unwrap_or(user.activated);
        user.banned = changes.banned.unwrap_or(user.banned);
        if let Some(banned_until) = changes.banned_until {
            user.banned_until = banned_until;
        }
        user.available_invites = changes
            .available_invites
            .unwrap_or(user.available_invites);

        Ok(Ok(user.clone()))
    }

    async fn set_openid_url(&self, id: Uuid, openid_url: &str) -> Result<bool, Report> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .user_mut(id)
            .map(|user| user.openid_url = Some(openid_url.to_owned()))
            .is_some())
    }

    async fn touch_user(&self, id: Uuid, at: OffsetDateTime) -> Result<(), Report> {
        if let Some(user) = self.tables.write().await.user_mut(id) {
            user.last_active = Some(at);
        }
        Ok(())
    }

    async fn grant_invite(&self, id: Uuid) -> Result<Option<User>, Report> {
        let mut tables = self.tables.write().await;
        Ok(tables.user_mut(id).map(|user| {
            user.available_invites += 1;
            user.clone()
        }))
    }

    async fn revoke_invites(&self, id: Uuid) -> Result<Option<User>, Report> {
        let mut tables = self.tables.write().await;
        Ok(tables.user_mut(id).map(|user| {
            user.available_invites = 0;
            user.clone()
        }))
    }

    async fn find_invite(&self, token: &str) -> Result<Option<Invite>, Report> {
        Ok(self
            .tables
            .read()
            .await
            .invites
            .iter()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn create_invite(
        &self,
        new_invite: NewInvite,
    ) -> Result<Result<Invite, InviteError>, Report> {
        let mut tables = self.tables.write().await;

        if tables.email_taken(&new_invite.email, None) {
            return Ok(Err(InviteError::AlreadyRegistered));
        }
        let Some(inviter) = tables.user_mut(new_invite.inviter) else {
            return Ok(Err(InviteError::NoInvitesLeft));
        };
        if !new_invite.unlimited {
            if inviter.available_invites <= 0 {
                return Ok(Err(InviteError::NoInvitesLeft));
            }
            inviter.available_invites -= 1;
        }

        tables.invites.retain(|i| i.email != *new_invite.email);
        let invite = Invite {
            id: Uuid::new_v4(),
            token: new_invite.token,
            user_id: new_invite.inviter,
            email: new_invite.email.into(),
            message: new_invite.message,
            expires_at: new_invite.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.invites.push(invite.clone());

        Ok(Ok(invite))
    }

    async fn delete_invite(&self, id: Uuid) -> Result<(), Report> {
        self.tables.write().await.invites.retain(|i| i.id != id);
        Ok(())
    }

    async fn posts_by_user(
        &self,
        user_id: Uuid,
        paging: Paging,
        include_trusted: bool,
    ) -> Result<Vec<Post>, Report> {
        let mut posts: Vec<Post> = self
            .tables
            .read()
            .await
            .posts
            .iter()
            .filter(|p| p.user_id == user_id && (include_trusted || !p.trusted))
            .cloned()
            .collect();
        posts.sort_by_key(|p| Reverse(p.created_at));

        Ok(posts
            .into_iter()
            .skip(usize::try_from(paging.offset())?)
            .take(usize::try_from(paging.per_page)?)
            .collect())
    }

    async fn posts_per_week(&self, user_id: Uuid) -> Result<Vec<WeeklyPosts>, Report> {
        let mut weeks: Vec<WeeklyPosts> = Vec::new();
        let mut keys: Vec<(i32, i32)> = self
            .tables
            .read()
            .await
            .posts
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| {
                let (year, week, _) = p.created_at.to_iso_week_date();
                (year, i32::from(week))
            })
            .collect();
        keys.sort_unstable();

        for (year, week) in keys {
            match weeks.last_mut() {
                Some(last) if last.year == year && last.week == week => last.post_count += 1,
                _ => weeks.push(WeeklyPosts {
                    year,
                    week,
                    post_count: 1,
                }),
            }
        }

        Ok(weeks)
    }
}
