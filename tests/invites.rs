mod common;

use common::{location, page, spawn_app};
use pfoertner::database::{Store, UserChanges};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn user_admins_grant_and_revoke_invites() {
    let app = spawn_app("").await;
    let marge = app.user("marge", None).await;
    app.change(
        &marge,
        UserChanges {
            user_admin: Some(true),
            ..UserChanges::default()
        },
    )
    .await;
    app.user("bart", None).await;
    let browser = app.logged_in("marge").await;

    for _ in 0..2 {
        let response = browser.post("/users/bart/grant_invite", json!({})).await;
        assert_eq!(location(&response), "/users/bart");
    }
    assert_eq!(app.find("bart").await.available_invites, 2);

    let response = browser.post("/users/bart/grant_invite", json!({})).await;
    let (_, body) = browser.follow(response).await;
    assert_eq!(body["notice"], "bart has been granted one invite.");

    let response = browser.post("/users/bart/revoke_invites", json!({})).await;
    let (_, body) = browser.follow(response).await;
    assert_eq!(body["notice"], "bart has been revoked of all invites.");
    assert_eq!(app.find("bart").await.available_invites, 0);
}

#[tokio::test]
async fn users_cannot_grant_themselves_invites() {
    let app = spawn_app("").await;
    app.user("bart", None).await;
    let browser = app.logged_in("bart").await;

    let response = browser.post("/users/bart/grant_invite", json!({})).await;
    assert_eq!(location(&response), "/users/bart");
    let (_, body) = browser.follow(response).await;
    assert_eq!(body["notice"], "You don't have permission to do that!");
    assert_eq!(app.find("bart").await.available_invites, 0);
}

#[tokio::test]
async fn inviting_uses_up_an_invite() {
    let app = spawn_app("").await;
    let bart = app.user("bart", None).await;
    app.change(
        &bart,
        UserChanges {
            available_invites: Some(1),
            ..UserChanges::default()
        },
    )
    .await;
    let browser = app.logged_in("bart").await;

    let response = browser
        .post(
            "/invites",
            json!({ "email": "milhouse@example.com", "message": "Come play" }),
        )
        .await;
    assert_eq!(location(&response), "/users/bart");
    let (_, body) = browser.follow(response).await;
    assert_eq!(body["notice"], "An invite has been sent to milhouse@example.com");
    assert_eq!(app.find("bart").await.available_invites, 0);

    let mails = app.mailer.messages();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].to, "milhouse@example.com");
    assert!(mails[0].text.contains("Come play"));
    assert!(mails[0].text.contains("http://forum.test/users/new?token="));

    let response = browser
        .post("/invites", json!({ "email": "nelson@example.com" }))
        .await;
    let (_, body) = browser.follow(response).await;
    assert_eq!(body["notice"], "You don't have any invites!");
    assert_eq!(app.mailer.messages().len(), 1);
}

#[tokio::test]
async fn invites_need_a_new_email() {
    let app = spawn_app("").await;
    let bart = app.user("bart", None).await;
    app.user("lisa", Some("lisa@example.com")).await;
    app.change(
        &bart,
        UserChanges {
            available_invites: Some(3),
            ..UserChanges::default()
        },
    )
    .await;
    let browser = app.logged_in("bart").await;

    for email in ["not an email", "lisa@example.com"] {
        let response = browser.post("/invites", json!({ "email": email })).await;
        let (status, body) = page(response).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["notice"], "Could not send your invite");
        assert_eq!(body["email"], email);
        assert_eq!(body["errors"][0]["field"], "email");
    }
    assert_eq!(app.find("bart").await.available_invites, 3);
    assert!(app.mailer.messages().is_empty());
}

#[tokio::test]
async fn undeliverable_invites_are_withdrawn() {
    let app = spawn_app("").await;
    let bart = app.user("bart", None).await;
    app.change(
        &bart,
        UserChanges {
            available_invites: Some(1),
            ..UserChanges::default()
        },
    )
    .await;
    let browser = app.logged_in("bart").await;
    app.mailer.break_down();

    let response = browser
        .post("/invites", json!({ "email": "milhouse@example.com" }))
        .await;
    assert_eq!(location(&response), "/users/bart");
    let (_, body) = browser.follow(response).await;
    assert_eq!(
        body["notice"],
        "Your invite to milhouse@example.com could not be sent, please try again later"
    );
    assert_eq!(app.find("bart").await.available_invites, 1);
    assert!(app.mailer.messages().is_empty());

    let undelivered = app.mailer.undelivered();
    assert_eq!(undelivered.len(), 1);
    let token = undelivered[0]
        .text
        .split("token=")
        .nth(1)
        .unwrap()
        .split_whitespace()
        .next()
        .unwrap();
    assert!(app.store.find_invite(token).await.unwrap().is_none());
}
