use axum::body::Body;
use axum::http::{Request, StatusCode};
use embedded_oidc::{InMemoryUserStore, OidcProvider, OidcUser, Provider};
use tower::ServiceExt;

fn build_provider() -> Provider {
    let users = InMemoryUserStore::new().add_user(
        "alice@example.com",
        "password123",
        OidcUser {
            sub: "user-1".into(),
            email: "alice@example.com".into(),
            name: "Alice".into(),
            ..Default::default()
        },
    );

    OidcProvider::new()
        .issuer("http://localhost:3000")
        .with_user_store(users)
        .build()
}

async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn userinfo_success() {
    let provider = build_provider();
    // Mint an access token directly; the flow-level path is covered by the
    // token endpoint tests.
    let token = provider
        .token_service()
        .issue_access_token("user-1", "some-client", &["openid".into()])
        .unwrap();

    let req = Request::get("/userinfo")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let resp = provider.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["sub"], "user-1");
    assert_eq!(json["email"], "alice@example.com");
    assert_eq!(json["name"], "Alice");
}

#[tokio::test]
async fn userinfo_missing_auth_header() {
    let provider = build_provider();

    let req = Request::get("/userinfo").body(Body::empty()).unwrap();

    let resp = provider.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn userinfo_invalid_token() {
    let provider = build_provider();

    let req = Request::get("/userinfo")
        .header("authorization", "Bearer invalid.token.here")
        .body(Body::empty())
        .unwrap();

    let resp = provider.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
