//! The public side of users: listings and profile pages

use axum::{
    extract::{Path, Query},
    Extension,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    database::{Paging, Post, User, UserList, WeeklyPosts},
    error_handling::ApiError,
    guards::{load_user, requires_authentication, CurrentUser},
    responses::Page,
    session::Session,
    SharedState,
};

/// Posts shown per page of a profile
const POSTS_PER_PAGE: u32 = 15;

#[derive(Debug, Serialize)]
pub(crate) struct Listing {
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
pub(crate) struct IndexPage {
    users: Vec<User>,
    online_users: Vec<User>,
}

/// All active users, along with who of them is online
#[instrument(skip_all)]
pub(crate) async fn index(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
) -> Result<Page<IndexPage>, ApiError> {
    requires_authentication(&app.config, &current)?;

    let users = app.store.list_users(UserList::Active).await?;
    let now = OffsetDateTime::now_utc();
    let online_users = users
        .iter()
        .filter(|user| user.is_online(now))
        .cloned()
        .collect();

    Ok(Page::new(
        session.notice().await,
        IndexPage {
            users,
            online_users,
        },
    ))
}

async fn listing(
    app: &SharedState,
    current: &CurrentUser,
    session: &Session,
    list: UserList,
) -> Result<Page<Listing>, ApiError> {
    requires_authentication(&app.config, current)?;

    let users = app.store.list_users(list).await?;
    Ok(Page::new(session.notice().await, Listing { users }))
}

/// Defines a handler rendering one of the predefined [UserList]s
macro_rules! listing_handler {
    ($($name:ident => $list:expr),* $(,)?) => {
        $(
            #[instrument(skip_all)]
            pub(crate) async fn $name(
                Extension(app): Extension<SharedState>,
                current: CurrentUser,
                session: Session,
            ) -> Result<Page<Listing>, ApiError> {
                listing(&app, &current, &session, $list).await
            }
        )*
    };
}

listing_handler! {
    banned => UserList::Banned,
    recently_joined => UserList::RecentlyJoined,
    online => UserList::Online,
    admins => UserList::Admins,
    xboxlive => UserList::XboxLive,
    social => UserList::Social,
    top_posters => UserList::TopPosters,
}

/// The trusted users, with a hint for those who are not
#[instrument(skip_all)]
pub(crate) async fn trusted(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
) -> Result<Page<Listing>, ApiError> {
    let mut page = listing(&app, &current, &session, UserList::Trusted).await?;
    if !current.is_trusted() {
        page.notice = Some("You need to be trusted to view this page!".to_owned());
    }
    Ok(page)
}

#[derive(Debug, Serialize)]
pub(crate) struct ProfilePage {
    user: User,
    posts: Vec<Post>,
}

#[instrument(skip(app, current, session))]
pub(crate) async fn show(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
) -> Result<Page<ProfilePage>, ApiError> {
    requires_authentication(&app.config, &current)?;
    let user = load_user(app.store.as_ref(), &id).await?;

    let paging = Paging {
        page: 1,
        per_page: POSTS_PER_PAGE,
    };
    let posts = app
        .store
        .posts_by_user(user.id, paging, current.is_trusted())
        .await?;

    Ok(Page::new(session.notice().await, ProfilePage { user, posts }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PostsPage {
    user: User,
    page: u32,
    posts: Vec<Post>,
}

#[instrument(skip(app, current, session))]
pub(crate) async fn posts(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Page<PostsPage>, ApiError> {
    requires_authentication(&app.config, &current)?;
    let user = load_user(app.store.as_ref(), &id).await?;

    let page = query.page.unwrap_or(1).max(1);
    let paging = Paging {
        page,
        per_page: POSTS_PER_PAGE,
    };
    let posts = app
        .store
        .posts_by_user(user.id, paging, current.is_trusted())
        .await?;

    Ok(Page::new(
        session.notice().await,
        PostsPage { user, page, posts },
    ))
}

#[derive(Debug, Serialize)]
pub(crate) struct StatsPage {
    user: User,
    posts_per_week: Vec<WeeklyPosts>,
    max_posts_per_week: Option<i64>,
}

/// Posting activity per ISO week
#[instrument(skip(app, current, session))]
pub(crate) async fn stats(
    Extension(app): Extension<SharedState>,
    current: CurrentUser,
    session: Session,
    Path(id): Path<String>,
) -> Result<Page<StatsPage>, ApiError> {
    requires_authentication(&app.config, &current)?;
    let user = load_user(app.store.as_ref(), &id).await?;

    let posts_per_week = app.store.posts_per_week(user.id).await?;
    let max_posts_per_week = posts_per_week.iter().map(|week| week.post_count).max();

    Ok(Page::new(
        session.notice().await,
        StatsPage {
            user,
            posts_per_week,
            max_posts_per_week,
        },
    ))
}
