mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use common::{signed_as, signed_at, TestApp, ACTOR_SECRET};
use http_body_util::BodyExt;
use serde_json::Value;
use support_access::{
    middleware::{sign_actor, ACTOR_HEADER, ACTOR_SIGNATURE_HEADER, ACTOR_TIMESTAMP_HEADER},
    models::IdentityId,
};
use tower::ServiceExt;

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, actor: Option<IdentityId>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(actor) = actor {
        builder = signed_as(builder, actor);
    }
    builder.body(Body::empty()).unwrap()
}

fn generate_form(body: String, actor: IdentityId) -> Request<Body> {
    signed_as(
        Request::builder()
            .method("POST")
            .uri("/support-access/generate")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded"),
        actor,
    )
    .body(Body::from(body))
    .unwrap()
}

async fn issue_nonce(app: &TestApp, action: &str, actor: IdentityId) -> String {
    let response = app
        .router()
        .oneshot(get(&format!("/support-access/nonce?action={}", action), Some(actor)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["nonce"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_check_reports_service() {
    let app = TestApp::spawn().await;

    let response = app.router().oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "support-access");
}

#[tokio::test]
async fn full_lifecycle_over_http() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    app.mount_revoke_site_ok().await;

    // Grant
    let nonce = issue_nonce(&app, "grant", app.admin).await;
    let response = app
        .router()
        .oneshot(generate_form(
            format!("vendor=acme&_nonce={}", nonce),
            app.admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let grant = json_body(response).await;
    assert_eq!(grant["siteUrl"], "https://site.example");
    let endpoint = grant["endpoint"].as_str().unwrap().to_string();
    let identifier = grant["identifier"].as_str().unwrap().to_string();
    assert_eq!(identifier.len(), 96);
    assert!(grant["expiresAt"].is_i64());

    // Login, twice: the link is reusable until revoked
    for _ in 0..2 {
        let response = app
            .router()
            .oneshot(get(&format!("/{}/{}", endpoint, identifier), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://site.example/wp-admin/"
        );
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(cookie.starts_with("support_session="));
        assert!(cookie.contains("HttpOnly"));
    }

    // Listing
    let response = app
        .router()
        .oneshot(get("/support-access/users", Some(app.admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listing = json_body(response).await;
    let users = listing["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["displayName"], "Acme Support");
    let revoke_url = users[0]["revokeUrl"].as_str().unwrap().to_string();
    assert!(revoke_url.starts_with("https://site.example/support-access/revoke?revoke=acme&id="));
    assert!(!revoke_url.contains(&identifier));

    // Revoke through the generated link
    let path_and_query = revoke_url.trim_start_matches("https://site.example");
    let response = app
        .router()
        .oneshot(get(path_and_query, Some(app.admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        "Done! Acme Support access revoked."
    );

    // The old link is dead
    let response = app
        .router()
        .oneshot(get(&format!("/{}/{}", endpoint, identifier), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generate_accepts_json() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let nonce = issue_nonce(&app, "grant", app.admin).await;

    let response = app
        .router()
        .oneshot(
            signed_as(
                Request::builder()
                    .method("POST")
                    .uri("/support-access/generate")
                    .header(header::CONTENT_TYPE, "application/json"),
                app.admin,
            )
            .body(Body::from(
                serde_json::json!({ "vendor": "acme", "_nonce": nonce }).to_string(),
            ))
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn generate_rejections() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let nonce = issue_nonce(&app, "grant", app.admin).await;

    // No actor
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/support-access/generate")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!("vendor=acme&_nonce={}", nonce)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Another vendor
    let response = app
        .router()
        .oneshot(generate_form(format!("vendor=other&_nonce={}", nonce), app.admin))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Empty vendor
    let response = app
        .router()
        .oneshot(generate_form(format!("vendor=&_nonce={}", nonce), app.admin))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing token
    let response = app
        .router()
        .oneshot(generate_form("vendor=acme".to_string(), app.admin))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Token for a different action
    let revoke_nonce = issue_nonce(&app, "revoke", app.admin).await;
    let response = app
        .router()
        .oneshot(generate_form(
            format!("vendor=acme&_nonce={}", revoke_nonce),
            app.admin,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(app.orchestrator().identities().exists().await.unwrap().is_none());

    // A second grant conflicts
    for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
        let response = app
            .router()
            .oneshot(generate_form(format!("vendor=acme&_nonce={}", nonce), app.admin))
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn generate_reports_partial_success_when_broker_is_down() {
    let app = TestApp::spawn().await;
    app.mount_create_site_status(500).await;
    let nonce = issue_nonce(&app, "grant", app.admin).await;

    let response = app
        .router()
        .oneshot(generate_form(format!("vendor=acme&_nonce={}", nonce), app.admin))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unavailable");
    assert_eq!(body["identifier"].as_str().unwrap().len(), 96);
    assert!(body["message"].as_str().unwrap().contains("Acme"));
}

#[tokio::test]
async fn login_with_wrong_endpoint_is_not_found() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let admin = app.admin_actor().await;
    let grant = app.orchestrator().grant(&admin).await.unwrap().grant;

    let response = app
        .router()
        .oneshot(get(
            &format!("/{}/{}", "0".repeat(64), grant.identifier_hash),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn unprivileged_revoke_is_sent_home() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let admin = app.admin_actor().await;
    app.orchestrator().grant(&admin).await.unwrap();

    let reader = app
        .host
        .add_identity("reader", "reader@site.example", &["subscriber"])
        .unwrap();

    for actor in [None, Some(reader)] {
        let response = app
            .router()
            .oneshot(get("/support-access/revoke?revoke=acme&id=all&_nonce=x", actor))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://site.example/"
        );
    }

    assert!(app.orchestrator().identities().exists().await.unwrap().is_some());
}

#[tokio::test]
async fn revoke_requires_a_valid_token() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let admin = app.admin_actor().await;
    app.orchestrator().grant(&admin).await.unwrap();

    let response = app
        .router()
        .oneshot(get(
            "/support-access/revoke?revoke=acme&id=all&_nonce=forged",
            Some(app.admin),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.orchestrator().identities().exists().await.unwrap().is_some());
}

#[tokio::test]
async fn listing_requires_list_users() {
    let app = TestApp::spawn().await;
    let reader = app
        .host
        .add_identity("reader", "reader@site.example", &["subscriber"])
        .unwrap();

    let response = app
        .router()
        .oneshot(get("/support-access/users", Some(reader)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn extend_over_http() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let admin = app.admin_actor().await;
    let grant = app.orchestrator().grant(&admin).await.unwrap().grant;
    let later = chrono::Utc::now().timestamp() + 3_600;

    let request = |identifier: &str, expires_at: Option<i64>| {
        signed_as(
            Request::builder()
                .method("POST")
                .uri("/support-access/extend")
                .header(header::CONTENT_TYPE, "application/json"),
            app.admin,
        )
        .body(Body::from(
            serde_json::json!({ "identifier": identifier, "expiresAt": expires_at }).to_string(),
        ))
        .unwrap()
    };

    let response = app
        .router()
        .oneshot(request(&grant.identifier_hash, Some(later)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["expiresAt"], later);

    let response = app
        .router()
        .oneshot(request(&grant.identifier_hash, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router()
        .oneshot(request("unknown", Some(later)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn actor_header_requires_a_valid_signature() {
    let app = TestApp::spawn().await;
    let uri = "/support-access/nonce?action=grant";

    // Bare header, as any client could send it
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(ACTOR_HEADER, app.admin.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Signed with the wrong secret
    let now = chrono::Utc::now().timestamp();
    let forged = sign_actor(
        "not-the-actor-secret",
        "GET",
        "/support-access/nonce",
        app.admin,
        now,
    )
    .unwrap();
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(ACTOR_HEADER, app.admin.to_string())
                .header(ACTOR_TIMESTAMP_HEADER, now.to_string())
                .header(ACTOR_SIGNATURE_HEADER, forged)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Valid signature for another route
    let other_route = sign_actor(ACTOR_SECRET, "GET", "/support-access/users", app.admin, now)
        .unwrap();
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(ACTOR_HEADER, app.admin.to_string())
                .header(ACTOR_TIMESTAMP_HEADER, now.to_string())
                .header(ACTOR_SIGNATURE_HEADER, other_route)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Stale timestamp
    let response = app
        .router()
        .oneshot(
            signed_at(Request::builder().method("GET").uri(uri), app.admin, now - 600)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router()
        .oneshot(get(uri, Some(app.admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn support_identity_revoking_itself_is_sent_home() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    app.mount_revoke_site_ok().await;
    let admin = app.admin_actor().await;
    let grant = app.orchestrator().grant(&admin).await.unwrap().grant;

    let nonce = issue_nonce(&app, "revoke", grant.identity_id).await;
    let response = app
        .router()
        .oneshot(get(
            &format!("/support-access/revoke?revoke=acme&id=all&_nonce={}", nonce),
            Some(grant.identity_id),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://site.example/"
    );
    assert!(app.orchestrator().identities().exists().await.unwrap().is_none());
}

#[tokio::test]
async fn identifier_hash_does_not_log_in() {
    let app = TestApp::spawn().await;
    app.mount_create_site_ok().await;
    let admin = app.admin_actor().await;
    let grant = app.orchestrator().grant(&admin).await.unwrap().grant;

    let response = app
        .router()
        .oneshot(get(
            &format!("/{}/{}", grant.endpoint, grant.identifier_hash),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(app.orchestrator().identities().exists().await.unwrap().is_some());
}
