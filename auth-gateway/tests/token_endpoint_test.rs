mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use common::{TestApp, BOB, NATIVE_SECRET, PASSWORD};

#[tokio::test]
async fn password_grant_issues_usable_token() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", "web"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "bearer");
    assert_eq!(res.body["userName"], "alice");
    assert_eq!(res.body["as:client_id"], "web");
    assert!(res.body["refresh_token"].is_string());
    assert!(res.body[".issued"].as_str().unwrap().ends_with("GMT"));
    let expires_in = res.body["expires_in"].as_i64().unwrap();
    assert!(expires_in > 0 && expires_in <= 20 * 60);

    let token = res.body["access_token"].as_str().unwrap();
    let claims = app.get_bearer("/api/Authentication/claims", token).await;
    assert_eq!(claims.status, StatusCode::OK);
    assert_eq!(claims.body["Username"], "alice");
    assert_eq!(claims.body["AuthClient"], "web");
    assert_eq!(claims.body["IsImpersonated"], false);
    assert!(claims.body["Roles"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "admin"));
}

#[tokio::test]
async fn wrong_password_is_invalid_grant() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", "wrong"),
            ("client_id", "web"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_grant");
}

#[tokio::test]
async fn unknown_user_looks_like_wrong_password() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "mallory"),
            ("password", PASSWORD),
            ("client_id", "web"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_grant");
}

#[tokio::test]
async fn unknown_client_is_rejected() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", "nope"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_clientId");
}

#[tokio::test]
async fn missing_client_is_rejected() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
        ])
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_clientId");
}

#[tokio::test]
async fn second_login_without_force_is_rejected() {
    let app = TestApp::spawn();
    let form = [
        ("grant_type", "password"),
        ("username", "bob"),
        ("password", PASSWORD),
        ("client_id", "web"),
    ];

    let first = app.post_token(&form).await;
    assert_eq!(first.status, StatusCode::OK);

    let second = app.post_token(&form).await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.body["error"], "session_rejected");

    let forced = app.post_token(&[form[0], form[1], form[2], form[3], ("forceLogin", "true")]).await;
    assert_eq!(forced.status, StatusCode::OK);

    let old = first.body["access_token"].as_str().unwrap();
    let res = app.get_bearer("/api/Authentication/claims", old).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.message(), "UserSessionExpired");
}

#[tokio::test]
async fn disabled_user_is_forbidden() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "carol"),
            ("password", PASSWORD),
            ("client_id", "web"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["error"], "invalid_grant");
}

#[tokio::test]
async fn unsupported_grant_type() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[("grant_type", "client_credentials"), ("client_id", "web")])
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn malformed_form_is_invalid_request() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", "web"),
            ("forceLogin", "maybe"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "invalid_request");
}

#[tokio::test]
async fn confidential_client_authenticates_with_basic_header() {
    let app = TestApp::spawn();
    let basic = STANDARD.encode(format!("native:{}", NATIVE_SECRET));
    let body = serde_urlencoded::to_string([
        ("grant_type", "password"),
        ("username", "bob"),
        ("password", PASSWORD),
    ])
    .unwrap();

    let res = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::AUTHORIZATION, format!("Basic {}", basic))
                .body(Body::from(body))
                .unwrap(),
        )
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["as:client_id"], "native");
    assert!(res.body.get("refresh_token").is_none());
    assert_eq!(app.store.logged_in_session_count(BOB).unwrap(), 1);
}

#[tokio::test]
async fn confidential_client_with_wrong_secret_is_rejected() {
    let app = TestApp::spawn();

    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "bob"),
            ("password", PASSWORD),
            ("client_id", "native"),
            ("client_secret", "guess"),
        ])
        .await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_clientId");
}

#[tokio::test]
async fn refresh_token_is_redeemed_once() {
    let app = TestApp::spawn();
    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", "web"),
        ])
        .await;
    let refresh = res.body["refresh_token"].as_str().unwrap().to_string();

    let refreshed = app
        .post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh),
            ("client_id", "web"),
        ])
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_eq!(refreshed.body["userName"], "alice");
    assert_ne!(refreshed.body["refresh_token"], res.body["refresh_token"]);

    let token = refreshed.body["access_token"].as_str().unwrap();
    let claims = app.get_bearer("/api/Authentication/claims", token).await;
    assert_eq!(claims.status, StatusCode::OK);

    let replay = app
        .post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh),
            ("client_id", "web"),
        ])
        .await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
    assert_eq!(replay.body["error"], "invalid_grant");
}

#[tokio::test]
async fn refresh_after_logout_is_rejected() {
    let app = TestApp::spawn();
    let res = app
        .post_token(&[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", "web"),
        ])
        .await;
    let access = res.body["access_token"].as_str().unwrap();
    let refresh = res.body["refresh_token"].as_str().unwrap();

    assert_eq!(app.logout(access).await.status, StatusCode::OK);

    let refreshed = app
        .post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", "web"),
        ])
        .await;
    assert_eq!(refreshed.status, StatusCode::BAD_REQUEST);
    assert_eq!(refreshed.body["error"], "invalid_grant");
}

#[tokio::test]
async fn token_response_carries_client_origin() {
    let app = TestApp::spawn();
    let grant = |client_id: &str, origin: Option<&str>| {
        let form = serde_urlencoded::to_string([
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", PASSWORD),
            ("client_id", client_id),
            ("client_secret", NATIVE_SECRET),
            ("forceLogin", "true"),
        ])
        .unwrap();
        let mut builder = Request::builder()
            .method("POST")
            .uri("/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::from(form)).unwrap()
    };

    let res = app.send(grant("web", Some("http://localhost:3000"))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );

    let res = app.send(grant("web", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );

    let res = app.send(grant("native", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[tokio::test]
async fn foreign_origin_is_rejected_for_registered_client() {
    let app = TestApp::spawn();
    let form = serde_urlencoded::to_string([
        ("grant_type", "password"),
        ("username", "alice"),
        ("password", PASSWORD),
        ("client_id", "web"),
    ])
    .unwrap();

    let res = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::ORIGIN, "https://attacker.example")
                .body(Body::from(form))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "invalid_clientId");
    assert!(res.headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
