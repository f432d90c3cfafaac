//! HTTP-level tests for `/notify` and the per-target notification endpoints.

mod common;

use axum::http::StatusCode;
use common::{
    admin_token, body_json, delete, get_auth, notify_user, post, post_json, put, register_user,
    service_token, target_token,
};

const ALICE: &str = "/api/v1/targets/User/1/notifications";

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notify_without_token_returns_401() {
    let app = common::build_test_app();
    let response = common::send(
        app,
        axum::http::Method::POST,
        "/api/v1/notify",
        None,
        Some(serde_json::json!({
            "targets": [{ "type": "User", "id": 1 }],
            "notifiable": { "type": "Comment", "id": 1 },
        })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notify_with_target_role_returns_403() {
    let app = common::build_test_app();
    let response = post_json(
        app,
        "/api/v1/notify",
        &target_token("User", 1),
        serde_json::json!({
            "targets": [{ "type": "User", "id": 1 }],
            "notifiable": { "type": "Comment", "id": 1 },
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn garbage_token_returns_401() {
    let app = common::build_test_app();
    let response = get_auth(app, ALICE, "not-a-jwt").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn other_targets_notifications_are_forbidden() {
    let app = common::build_test_app();
    let response = get_auth(app, ALICE, &target_token("User", 2)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_read_any_target() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    notify_user(&app, 1, 10, "comment.reply").await;

    let response = get_auth(app, ALICE, &admin_token()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notify_creates_one_notification_per_target() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    register_user(&app, 2).await;

    let response = post_json(
        app.clone(),
        "/api/v1/notify",
        &service_token(),
        serde_json::json!({
            "targets": [{ "type": "User", "id": 1 }, { "type": "User", "id": 2 }],
            "notifiable": { "type": "Comment", "id": 7 },
            "notifier": { "type": "User", "id": 3 },
            "parameters": { "excerpt": "nice post" },
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let created = json["data"]["notifications"].as_array().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["key"], "comment.default");
    assert_eq!(created[0]["notifier_id"], 3);
    assert_eq!(created[1]["parameters"]["excerpt"], "nice post");
    assert_eq!(json["data"]["reports"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn notify_unknown_target_returns_404() {
    let app = common::build_test_app();
    let response = post_json(
        app,
        "/api/v1/notify",
        &service_token(),
        serde_json::json!({
            "targets": [{ "type": "User", "id": 99 }],
            "notifiable": { "type": "Comment", "id": 1 },
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notify_with_invalid_key_returns_400() {
    let app = common::build_test_app();
    register_user(&app, 1).await;

    let response = post_json(
        app,
        "/api/v1/notify",
        &service_token(),
        serde_json::json!({
            "targets": [{ "type": "User", "id": 1 }],
            "notifiable": { "type": "Comment", "id": 1 },
            "key": "Not A Key",
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notify_skips_unsubscribed_target() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    let alice = target_token("User", 1);

    let created = body_json(
        post_json(
            app.clone(),
            "/api/v1/targets/User/1/subscriptions",
            &alice,
            serde_json::json!({ "key": "comment.reply" }),
        )
        .await,
    )
    .await;
    let id = created["data"]["id"].as_i64().unwrap();
    let response = put(
        app.clone(),
        &format!("/api/v1/targets/User/1/subscriptions/{id}/unsubscribe"),
        &alice,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = notify_user(&app, 1, 10, "comment.reply").await;

    assert!(json["data"]["notifications"].as_array().unwrap().is_empty());
    assert_eq!(json["data"]["skipped_targets"][0]["type"], "User");
    assert_eq!(json["data"]["skipped_targets"][0]["id"], 1);
}

// ---------------------------------------------------------------------------
// Index and counts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn index_lists_owners_unless_members_requested() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    notify_user(&app, 1, 10, "comment.reply").await;
    notify_user(&app, 1, 11, "comment.reply").await;
    let alice = target_token("User", 1);

    let json = body_json(get_auth(app.clone(), ALICE, &alice).await).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let json = body_json(
        get_auth(
            app.clone(),
            &format!("{ALICE}?with_group_members=true"),
            &alice,
        )
        .await,
    )
    .await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let json = body_json(get_auth(app, &format!("{ALICE}/unopened-count"), &alice).await).await;
    assert_eq!(json["data"]["count"], 1);
}

#[tokio::test]
async fn filtered_listing_narrows_by_key() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    notify_user(&app, 1, 10, "comment.reply").await;
    notify_user(&app, 1, 11, "comment.mention").await;
    let alice = target_token("User", 1);

    let response = get_auth(
        app,
        &format!("{ALICE}?filter=unopened&filtered_by_key=comment.mention"),
        &alice,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["key"], "comment.mention");
}

#[tokio::test]
async fn group_filter_requires_type_and_id() {
    let app = common::build_test_app();
    let response = get_auth(
        app,
        &format!("{ALICE}?filtered_by_group_type=Article"),
        &target_token("User", 1),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Show / open / destroy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn show_includes_group_summary() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    let first = notify_user(&app, 1, 10, "comment.reply").await;
    notify_user(&app, 1, 11, "comment.reply").await;
    let owner_id = first["data"]["notifications"][0]["id"].as_i64().unwrap();

    let response = get_auth(
        app,
        &format!("{ALICE}/{owner_id}"),
        &target_token("User", 1),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["notification"]["id"], owner_id);
    assert_eq!(json["data"]["group"]["member_count"], 1);
    assert_eq!(json["data"]["group"]["notification_count"], 2);
}

#[tokio::test]
async fn open_marks_owner_and_members_once() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    let first = notify_user(&app, 1, 10, "comment.reply").await;
    notify_user(&app, 1, 11, "comment.reply").await;
    let owner_id = first["data"]["notifications"][0]["id"].as_i64().unwrap();
    let alice = target_token("User", 1);

    let response = put(app.clone(), &format!("{ALICE}/{owner_id}/open"), &alice).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["opened"], 2);
    assert!(json["data"]["notification"]["opened_at"].is_string());

    let json = body_json(put(app.clone(), &format!("{ALICE}/{owner_id}/open"), &alice).await).await;
    assert_eq!(json["data"]["opened"], 0);

    let json = body_json(get_auth(app, &format!("{ALICE}/unopened-count"), &alice).await).await;
    assert_eq!(json["data"]["count"], 0);
}

#[tokio::test]
async fn open_all_respects_key_filter() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    notify_user(&app, 1, 10, "comment.reply").await;
    notify_user(&app, 1, 11, "comment.mention").await;
    let alice = target_token("User", 1);

    let response = post(
        app.clone(),
        &format!("{ALICE}/open-all?filtered_by_key=comment.reply"),
        &alice,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["opened"], 1);

    let json = body_json(get_auth(app, &format!("{ALICE}/unopened-count"), &alice).await).await;
    assert_eq!(json["data"]["count"], 1);
}

#[tokio::test]
async fn destroy_returns_204_then_404() {
    let app = common::build_test_app();
    register_user(&app, 1).await;
    let json = notify_user(&app, 1, 10, "comment.reply").await;
    let id = json["data"]["notifications"][0]["id"].as_i64().unwrap();
    let alice = target_token("User", 1);

    let response = delete(app.clone(), &format!("{ALICE}/{id}"), &alice).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get_auth(app, &format!("{ALICE}/{id}"), &alice).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn notification_of_another_target_is_not_found() {
    let app = common::build_test_app();
    register_user(&app, 2).await;
    let json = notify_user(&app, 2, 10, "comment.reply").await;
    let id = json["data"]["notifications"][0]["id"].as_i64().unwrap();

    let response = get_auth(app, &format!("{ALICE}/{id}"), &target_token("User", 1)).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
