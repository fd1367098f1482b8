use axum::body::Body;
use axum::http::{Request, StatusCode};
use embedded_oidc::{InMemoryUserStore, OidcProvider, Provider};
use tower::ServiceExt;

fn build_provider() -> Provider {
    OidcProvider::new()
        .with_user_store(InMemoryUserStore::new())
        .build()
}

async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn jwks_endpoint() {
    let app = build_provider().router();
    let req = Request::get("/.well-known/jwks.json")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    let keys = json["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);

    let key = &keys[0];
    assert_eq!(key["kty"], "RSA");
    assert_eq!(key["alg"], "RS256");
    assert_eq!(key["use"], "sig");
    assert_eq!(key["kid"], "oidc-key-1");
    assert!(key["n"].as_str().unwrap().len() > 100); // RSA-2048 modulus
    assert!(!key["e"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn jwks_includes_retired_keys_after_rotation() {
    let provider = build_provider();
    provider.rotate_keys();

    let req = Request::get("/.well-known/jwks.json")
        .body(Body::empty())
        .unwrap();
    let resp = provider.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    let kids: Vec<&str> = json["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["kid"].as_str().unwrap())
        .collect();
    // Active key plus the retired one, still published for verification.
    assert!(kids.contains(&"oidc-key-1"));
    assert!(kids.contains(&"oidc-key-2"));

    provider.keys().drop_retired();
    let req = Request::get("/.well-known/jwks.json")
        .body(Body::empty())
        .unwrap();
    let resp = provider.router().oneshot(req).await.unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["keys"].as_array().unwrap().len(), 1);
}
