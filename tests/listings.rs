mod common;

use common::{page, spawn_app};
use pfoertner::database::{Post, UserChanges};
use reqwest::StatusCode;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[tokio::test]
async fn listings_filter_users() {
    let app = spawn_app("").await;
    let homer = app.user("homer", None).await;
    app.change(
        &homer,
        UserChanges {
            gamertag: Some("homer_j".to_owned()),
            ..UserChanges::default()
        },
    )
    .await;
    app.user("bart", None).await;
    let browser = app.logged_in("bart").await;

    let (status, body) = page(browser.get("/users/xboxlive").await).await;
    assert_eq!(status, StatusCode::OK);
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "homer");

    let (_, body) = page(browser.get("/users/recently_joined").await).await;
    assert_eq!(body["users"].as_array().unwrap().len(), 2);

    let (_, body) = page(browser.get("/users/banned").await).await;
    assert!(body["users"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trusted_listing_hints_untrusted_viewers() {
    let app = spawn_app("").await;
    let homer = app.user("homer", None).await;
    app.change(
        &homer,
        UserChanges {
            trusted: Some(true),
            ..UserChanges::default()
        },
    )
    .await;
    app.user("bart", None).await;

    let (_, body) = page(app.logged_in("bart").await.get("/users/trusted").await).await;
    assert_eq!(body["notice"], "You need to be trusted to view this page!");
    assert_eq!(body["users"][0]["username"], "homer");

    let (_, body) = page(app.logged_in("homer").await.get("/users/trusted").await).await;
    assert!(body["notice"].is_null());
}

#[tokio::test]
async fn posts_and_stats_of_a_user() {
    let app = spawn_app("").await;
    let homer = app.user("homer", None).await;
    app.user("bart", None).await;

    let now = OffsetDateTime::now_utc();
    for (age, trusted) in [(0, false), (1, true), (14, false)] {
        app.store
            .add_post(Post {
                id: Uuid::new_v4(),
                user_id: homer.id,
                discussion_id: Uuid::new_v4(),
                body: format!("Posted {age} days ago"),
                trusted,
                created_at: now - Duration::days(age),
            })
            .await;
    }
    let browser = app.logged_in("bart").await;

    let (status, body) = page(browser.get("/users/homer").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["posts_count"], 3);
    // The trusted post stays hidden from untrusted viewers
    assert_eq!(body["posts"].as_array().unwrap().len(), 2);
    assert_eq!(body["posts"][0]["body"], "Posted 0 days ago");

    let (_, body) = page(browser.get("/users/homer/posts?page=2").await).await;
    assert_eq!(body["page"], 2);
    assert!(body["posts"].as_array().unwrap().is_empty());

    let (_, body) = page(browser.get("/users/homer/stats").await).await;
    let weeks = body["posts_per_week"].as_array().unwrap();
    let total: i64 = weeks
        .iter()
        .map(|week| week["post_count"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 3);
    assert!(body["max_posts_per_week"].as_i64().unwrap() >= 1);
}

#[tokio::test]
async fn temporarily_banned_users_leave_the_user_list() {
    let app = spawn_app("").await;
    let nelson = app.user("nelson", None).await;
    app.change(
        &nelson,
        UserChanges {
            banned_until: Some(Some(OffsetDateTime::now_utc() + Duration::days(3))),
            ..UserChanges::default()
        },
    )
    .await;
    app.user("bart", None).await;
    let browser = app.logged_in("bart").await;

    let (_, body) = page(browser.get("/users").await).await;
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "bart");

    let (_, body) = page(browser.get("/users/banned").await).await;
    assert_eq!(body["users"][0]["username"], "nelson");
}
