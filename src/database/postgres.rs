//! PostgreSQL backed [Store]

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::Context, Report};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use time::OffsetDateTime;
use tracing::{debug, debug_span, info, Instrument};
use uuid::Uuid;

use super::{
    CreateError, Invite, InviteError, NewInvite, NewUser, Paging, Post, Store, UpdateError,
    User, UserChanges, UserList, WeeklyPosts,
};
use crate::{settings::DbConfig, types::EMail};

/// Every column of `users` except the password
const USER_COLUMNS: &str = "id, username, realname, email, admin, user_admin, trusted, \
    activated, banned, banned_until, openid_url, available_invites, inviter_id, location, \
    description, website, gamertag, twitter, posts_count, last_active, created_at";

/// Store talking to a PostgreSQL pool
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

/// Name of the unique index `error` violates, if any
fn violated_unique_index(error: &sqlx::Error) -> Option<&str> {
    match error {
        sqlx::Error::Database(e) if e.code().as_deref() == Some("23505") => e.constraint(),
        _ => None,
    }
}

fn taken(index: Option<&str>) -> Option<UpdateError> {
    match index? {
        "users_username_key" => Some(UpdateError::UsernameTaken),
        "users_email_key" => Some(UpdateError::EmailTaken),
        _ => None,
    }
}

impl PgStore {
    /// Connects to the database given by `config`, setting the application
    /// name to "pfoertner", and runs pending migrations
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: &DbConfig) -> color_eyre::Result<Self> {
        let options = std::convert::TryInto::<PgConnectOptions>::try_into(config)
            .wrap_err("Failed parsing database URL")?
            .application_name("pfoertner");

        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .instrument(debug_span!("Connecting to DB"))
            .await
            .wrap_err("Connecting to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .wrap_err("Running migrations")?;
        info!("Database is migrated");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self))]
    async fn count_users(&self) -> Result<i64, Report> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT count(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Report> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[tracing::instrument(skip(self))]
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, Report> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(username) = lower($1)"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn find_user_by_email(&self, email: &EMail) -> Result<Option<User>, Report> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(&**email)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, Report> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[tracing::instrument(skip(self))]
    async fn list_users(&self, list: UserList) -> Result<Vec<User>, Report> {
        let (condition, order) = match list {
            UserList::Active => (
                "activated AND NOT banned AND (banned_until IS NULL OR banned_until <= now())",
                "lower(username)",
            ),
            UserList::Banned => ("banned OR banned_until > now()", "lower(username)"),
            UserList::RecentlyJoined => ("activated", "created_at DESC"),
            UserList::Online => (
                "last_active > now() - interval '15 minutes'",
                "lower(username)",
            ),
            UserList::Admins => ("admin OR user_admin", "lower(username)"),
            UserList::XboxLive => ("gamertag IS NOT NULL", "lower(username)"),
            UserList::Social => ("twitter IS NOT NULL", "lower(username)"),
            UserList::TopPosters => ("activated", "posts_count DESC"),
            UserList::Trusted => ("trusted OR admin OR user_admin", "lower(username)"),
        };
        let limit = list
            .limit()
            .map(|limit| format!(" LIMIT {limit}"))
            .unwrap_or_default();

        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {condition} ORDER BY {order}{limit}"
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    /// Runs with the users table locked, so the emptiness check of an admin
    /// signup and the uniqueness checks can't race with other signups
    #[tracing::instrument(skip(self, new_user), fields(username = %new_user.username))]
    async fn create_user(&self, new_user: NewUser) -> Result<Result<User, CreateError>, Report> {
        let mut transaction = self.pool.begin().await?;

        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut transaction)
            .await?;

        if new_user.admin_signup {
            let count = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM users")
                .fetch_one(&mut transaction)
                .await?;
            if count > 0 {
                debug!("Other signup already created the admin");
                return Ok(Err(CreateError::NotFirstUser));
            }
        }

        let username_taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE lower(username) = lower($1))",
        )
        .bind(&*new_user.username)
        .fetch_one(&mut transaction)
        .await?;
        if username_taken {
            return Ok(Err(CreateError::UsernameTaken));
        }

        if let Some(email) = &new_user.email {
            let email_taken = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)",
            )
            .bind(&**email)
            .fetch_one(&mut transaction)
            .await?;
            if email_taken {
                return Ok(Err(CreateError::EmailTaken));
            }
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO
                users (id, username, email, password, realname, location, description,
                       website, gamertag, twitter, inviter_id, activated, admin)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(String::from(new_user.username))
        .bind(new_user.email.map(String::from))
        .bind(new_user.password_hash)
        .bind(new_user.realname)
        .bind(new_user.location)
        .bind(new_user.description)
        .bind(new_user.website)
        .bind(new_user.gamertag)
        .bind(new_user.twitter)
        .bind(new_user.inviter_id)
        .bind(new_user.activated)
        .bind(new_user.admin_signup)
        .fetch_one(&mut transaction)
        .await?;

        transaction.commit().await?;

        if user.admin {
            info!("Created admin {}", user.username);
        }

        Ok(Ok(user))
    }

    #[tracing::instrument(skip(self, changes))]
    async fn update_user(
        &self,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<Result<User, UpdateError>, Report> {
        let (ban_changed, banned_until) = match changes.banned_until {
            Some(until) => (true, until),
            None => (false, None),
        };

        let result = sqlx::query_as::<_, User>(&format!(
            "UPDATE
                users
            SET
                username = coalesce($2, username),
                realname = NULLIF(coalesce($3, realname), ''),
                email = NULLIF(coalesce($4, email), ''),
                password = coalesce($5, password),
                location = NULLIF(coalesce($6, location), ''),
                description = NULLIF(coalesce($7, description), ''),
                website = NULLIF(coalesce($8, website), ''),
                gamertag = NULLIF(coalesce($9, gamertag), ''),
                twitter = NULLIF(coalesce($10, twitter), ''),
                admin = coalesce($11, admin),
                user_admin = coalesce($12, user_admin),
                trusted = coalesce($13, trusted),
                activated = coalesce($14, activated),
                banned = coalesce($15, banned),
                banned_until = CASE WHEN $16 THEN $17 ELSE banned_until END,
                available_invites = coalesce($18, available_invites)
            WHERE
                id = $1
            RETURNING
                {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(changes.username.map(String::from))
        .bind(changes.realname)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.location)
        .bind(changes.description)
        .bind(changes.website)
        .bind(changes.gamertag)
        .bind(changes.twitter)
        .bind(changes.admin)
        .bind(changes.user_admin)
        .bind(changes.trusted)
        .bind(changes.activated)
        .bind(changes.banned)
        .bind(ban_changed)
        .bind(banned_until)
        .bind(changes.available_invites)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(Some(user)) => Ok(Ok(user)),
            Ok(None) => Ok(Err(UpdateError::NotFound)),
            Err(e) => match taken(violated_unique_index(&e)) {
                Some(error) => Ok(Err(error)),
                None => Err(e.into()),
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn set_openid_url(&self, id: Uuid, openid_url: &str) -> Result<bool, Report> {
        let result = sqlx::query("UPDATE users SET openid_url = $2 WHERE id = $1")
            .bind(id)
            .bind(openid_url)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn touch_user(&self, id: Uuid, at: OffsetDateTime) -> Result<(), Report> {
        sqlx::query("UPDATE users SET last_active = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn grant_invite(&self, id: Uuid) -> Result<Option<User>, Report> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET available_invites = available_invites + 1
            WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn revoke_invites(&self, id: Uuid) -> Result<Option<User>, Report> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET available_invites = 0 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self, token))]
    async fn find_invite(&self, token: &str) -> Result<Option<Invite>, Report> {
        Ok(sqlx::query_as::<_, Invite>(
            "SELECT id, token, user_id, email, message, expires_at, created_at
            FROM invites WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self, new_invite), fields(email = %new_invite.email))]
    async fn create_invite(
        &self,
        new_invite: NewInvite,
    ) -> Result<Result<Invite, InviteError>, Report> {
        let mut transaction = self.pool.begin().await?;

        let already_registered =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(&*new_invite.email)
                .fetch_one(&mut transaction)
                .await?;
        if already_registered {
            return Ok(Err(InviteError::AlreadyRegistered));
        }

        if !new_invite.unlimited {
            let used = sqlx::query(
                "UPDATE users SET available_invites = available_invites - 1
                WHERE id = $1 AND available_invites > 0",
            )
            .bind(new_invite.inviter)
            .execute(&mut transaction)
            .await?;
            if used.rows_affected() == 0 {
                return Ok(Err(InviteError::NoInvitesLeft));
            }
        }

        sqlx::query("DELETE FROM invites WHERE email = $1")
            .bind(&*new_invite.email)
            .execute(&mut transaction)
            .await?;

        let invite = sqlx::query_as::<_, Invite>(
            "INSERT INTO
                invites (id, token, user_id, email, message, expires_at)
            VALUES
                ($1, $2, $3, $4, $5, $6)
            RETURNING
                id, token, user_id, email, message, expires_at, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new_invite.token)
        .bind(new_invite.inviter)
        .bind(String::from(new_invite.email))
        .bind(new_invite.message)
        .bind(new_invite.expires_at)
        .fetch_one(&mut transaction)
        .await?;

        transaction.commit().await?;

        Ok(Ok(invite))
    }

    #[tracing::instrument(skip(self))]
    async fn delete_invite(&self, id: Uuid) -> Result<(), Report> {
        sqlx::query("DELETE FROM invites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn posts_by_user(
        &self,
        user_id: Uuid,
        paging: Paging,
        include_trusted: bool,
    ) -> Result<Vec<Post>, Report> {
        Ok(sqlx::query_as::<_, Post>(
            "SELECT id, user_id, discussion_id, body, trusted, created_at
            FROM posts
            WHERE user_id = $1 AND ($2 OR NOT trusted)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(include_trusted)
        .bind(i64::from(paging.per_page))
        .bind(i64::from(paging.offset()))
        .fetch_all(&self.pool)
        .await?)
    }

    #[tracing::instrument(skip(self))]
    async fn posts_per_week(&self, user_id: Uuid) -> Result<Vec<WeeklyPosts>, Report> {
        Ok(sqlx::query_as::<_, WeeklyPosts>(
            "SELECT
                EXTRACT(ISOYEAR FROM created_at)::int4 AS year,
                EXTRACT(WEEK FROM created_at)::int4 AS week,
                count(*) AS post_count
            FROM posts
            WHERE user_id = $1
            GROUP BY 1, 2
            ORDER BY 1, 2",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::taken;
    use crate::database::UpdateError;

    #[test]
    fn unique_violations_name_the_taken_column() {
        assert_eq!(taken(Some("users_username_key")), Some(UpdateError::UsernameTaken));
        assert_eq!(taken(Some("users_email_key")), Some(UpdateError::EmailTaken));
        assert_eq!(taken(Some("invites_token_key")), None);
        assert_eq!(taken(None), None);
    }
}
