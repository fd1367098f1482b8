use axum::body::Body;
use axum::http::{Request, StatusCode};
use embedded_oidc::{ClientMetadata, InMemoryUserStore, OidcProvider, Provider};
use tower::ServiceExt;

async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn authorize_uri(client_id: &str, redirect_uri: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", "openid profile")
        .append_pair("state", "xyz")
        .finish();
    format!("/authorize?{query}")
}

async fn build_provider() -> (Provider, String) {
    let provider = OidcProvider::new()
        .with_user_store(InMemoryUserStore::new())
        .build();
    let registered = provider
        .register_client(ClientMetadata {
            name: "My External App".into(),
            redirect_uris: vec!["http://localhost:4000/callback".into()],
            grant_types: vec!["authorization_code".into()],
            token_endpoint_auth_method: "client_secret_post".into(),
            client_uri: None,
        })
        .await
        .unwrap();
    (provider, registered.client_id)
}

#[tokio::test]
async fn authorize_redirects_to_login_page() {
    let (provider, client_id) = build_provider().await;
    let app = provider.router();

    let req = Request::get(authorize_uri(&client_id, "http://localhost:4000/callback"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("/login?session_id="), "got {location}");
}

#[tokio::test]
async fn unknown_client_is_a_json_error_not_a_redirect() {
    let (provider, _) = build_provider().await;
    let app = provider.router();

    let req = Request::get(authorize_uri("no-such-client", "http://localhost:4000/callback"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn non_exact_redirect_uri_variants_rejected() {
    let (provider, client_id) = build_provider().await;

    for uri in [
        "http://localhost:4000/callback/",
        "http://localhost:4001/callback",
        "http://localhost:4000/callback/sub",
    ] {
        let app = provider.router();
        let req = Request::get(authorize_uri(&client_id, uri))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
        let json = body_json(resp).await;
        assert_eq!(
            json["error_description"],
            "redirect_uri is not registered for this client"
        );
    }
}

#[tokio::test]
async fn implicit_flow_not_supported() {
    let (provider, client_id) = build_provider().await;
    let app = provider.router();

    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("response_type", "token")
        .append_pair("client_id", &client_id)
        .append_pair("redirect_uri", "http://localhost:4000/callback")
        .finish();
    let req = Request::get(format!("/authorize?{query}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "unsupported_response_type");
}
