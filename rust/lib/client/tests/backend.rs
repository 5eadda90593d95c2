//! HTTP bindings against a mock backend.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use storefront_client::auth::SESSION_KEY;
use storefront_client::{BackendConfig, PostgrestProfiles, StaticToken, SupabaseAuth};
use storefront_kv::{KVStore, MemoryStore};
use storefront_session::{
    AuthEvent, AuthProvider, ChangeReason, ProfilePatch, ProfileStore, ProviderError,
    ProviderSession, ProviderUser, Role, RouteGuard, SessionConfig, SessionContext,
};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON: &str = "anon-key";

fn user_json(id: &str, email: &str) -> Value {
    json!({
        "id": id,
        "email": email,
        "user_metadata": { "name": "Ann" },
        "app_metadata": { "provider": "email" },
        "created_at": "2024-01-01T00:00:00Z"
    })
}

fn token_json(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": refresh,
        "user": user_json("u1", "a@x.com")
    })
}

fn profile_json(role: &str) -> Value {
    json!([{
        "id": "u1",
        "email": "a@x.com",
        "full_name": "Ann Smith",
        "avatar_url": null,
        "role": role,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    }])
}

fn stale_session(expires_at: i64) -> ProviderSession {
    ProviderSession {
        access_token: "old-access".into(),
        refresh_token: "old-refresh".into(),
        expires_at: Some(expires_at),
        user: ProviderUser::new("u1", "a@x.com"),
    }
}

async fn setup() -> (MockServer, Arc<MemoryStore>, Arc<SupabaseAuth>) {
    let server = MockServer::start().await;
    let kv = Arc::new(MemoryStore::new());
    let auth = Arc::new(SupabaseAuth::new(BackendConfig::new(server.uri(), ANON), kv.clone()));
    (server, kv, auth)
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn password_sign_in_persists_and_emits() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON))
        .and(body_string_contains("a@x.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .expect(1)
        .mount(&server)
        .await;

    let mut events = auth.subscribe();
    let session = auth.sign_in_with_password("a@x.com", "secret1").await.unwrap();
    assert_eq!(session.access_token, "acc-1");
    assert_eq!(session.user.user_meta_str(&["name"]), Some("Ann"));

    let persisted: ProviderSession =
        serde_json::from_slice(&kv.get(SESSION_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted, session);
    assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedIn);
}

#[tokio::test]
async fn rejected_sign_in_keeps_backend_message() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "error_code": "invalid_credentials",
            "msg": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let err = auth.sign_in_with_password("a@x.com", "nope").await.unwrap_err();
    assert_eq!(
        err,
        ProviderError::Rejected { status: 400, message: "Invalid login credentials".into() }
    );
    assert!(kv.is_empty());
}

#[tokio::test]
async fn sign_up_awaiting_confirmation_has_no_session() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(body_string_contains("\"name\":\"Ann\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json("u9", "n@x.com")))
        .mount(&server)
        .await;

    let result = auth.sign_up("n@x.com", "secret1", json!({ "name": "Ann" })).await.unwrap();
    assert_eq!(result.user.id, "u9");
    assert!(result.session.is_none());
    assert!(kv.is_empty());
}

#[tokio::test]
async fn expiring_session_is_refreshed() {
    let server = MockServer::start().await;
    let kv = Arc::new(MemoryStore::new());
    let stale = stale_session(Utc::now().timestamp() + 5);
    kv.set(SESSION_KEY, &serde_json::to_vec(&stale).unwrap()).unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_string_contains("old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-2", "ref-2")))
        .expect(1)
        .mount(&server)
        .await;

    let auth = SupabaseAuth::new(BackendConfig::new(server.uri(), ANON), kv.clone());
    let mut events = auth.subscribe();
    let fresh = auth.get_session().await.unwrap().unwrap();
    assert_eq!(fresh.access_token, "acc-2");
    assert_eq!(events.recv().await.unwrap().event, AuthEvent::TokenRefreshed);

    // Cached now; no second refresh.
    assert_eq!(auth.get_session().await.unwrap().unwrap().access_token, "acc-2");
}

#[tokio::test]
async fn rejected_refresh_ends_session() {
    let server = MockServer::start().await;
    let kv = Arc::new(MemoryStore::new());
    let stale = stale_session(Utc::now().timestamp() - 60);
    kv.set(SESSION_KEY, &serde_json::to_vec(&stale).unwrap()).unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid Refresh Token: Already Used"
        })))
        .mount(&server)
        .await;

    let auth = SupabaseAuth::new(BackendConfig::new(server.uri(), ANON), kv.clone());
    let mut events = auth.subscribe();
    assert_eq!(auth.get_session().await.unwrap(), None);
    assert!(kv.is_empty());
    let change = events.recv().await.unwrap();
    assert_eq!(change.event, AuthEvent::SignedOut);
    assert!(change.session.is_none());
}

#[tokio::test]
async fn sign_out_clears_even_if_token_already_invalid() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer acc-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "msg": "JWT expired" })))
        .expect(1)
        .mount(&server)
        .await;

    auth.sign_in_with_password("a@x.com", "secret1").await.unwrap();
    auth.sign_out().await.unwrap();
    assert_eq!(auth.get_session().await.unwrap(), None);
    assert!(kv.is_empty());

    // Nothing to end; no request.
    auth.sign_out().await.unwrap();
}

#[tokio::test]
async fn sign_out_server_error_keeps_session() {
    let (server, _kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    auth.sign_in_with_password("a@x.com", "secret1").await.unwrap();
    let err = auth.sign_out().await.unwrap_err();
    assert_eq!(err, ProviderError::Rejected { status: 500, message: "upstream down".into() });
    assert!(auth.get_session().await.unwrap().is_some());
}

#[tokio::test]
async fn metadata_update_emits_user_updated() {
    let (server, _kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .mount(&server)
        .await;
    let mut updated = user_json("u1", "a@x.com");
    updated["user_metadata"] = json!({ "name": "Ann Smith" });
    Mock::given(method("PUT"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer acc-1"))
        .and(body_string_contains("Ann Smith"))
        .respond_with(ResponseTemplate::new(200).set_body_json(updated))
        .expect(1)
        .mount(&server)
        .await;

    auth.sign_in_with_password("a@x.com", "secret1").await.unwrap();
    let mut events = auth.subscribe();
    let user = auth.update_user_metadata(json!({ "name": "Ann Smith" })).await.unwrap();
    assert_eq!(user.user_meta_str(&["name"]), Some("Ann Smith"));

    let change = events.recv().await.unwrap();
    assert_eq!(change.event, AuthEvent::UserUpdated);
    assert_eq!(change.session.unwrap().user, user);
}

// ============================================================================
// Profiles
// ============================================================================

#[tokio::test]
async fn select_profile_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u1"))
        .and(header("apikey", ANON))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("admin")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let profiles = PostgrestProfiles::new(
        BackendConfig::new(server.uri(), ANON),
        Arc::new(StaticToken::new("user-jwt")),
    );
    let row = profiles.select_by_id("u1").await.unwrap().unwrap();
    assert_eq!(row.role, Some(Role::Admin));
    assert_eq!(row.full_name.as_deref(), Some("Ann Smith"));
    assert_eq!(profiles.select_by_id("u2").await.unwrap(), None);
}

#[tokio::test]
async fn update_without_visible_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u1"))
        .and(header("prefer", "return=representation"))
        .and(body_string_contains("updated_at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let profiles = PostgrestProfiles::new(
        BackendConfig::new(server.uri(), ANON),
        Arc::new(StaticToken::new("user-jwt")),
    );
    let patch = ProfilePatch { full_name: "Ann".into(), avatar_url: None };
    let err = profiles.update_by_id("u1", &patch).await.unwrap_err();
    assert_eq!(err, ProviderError::Rejected { status: 404, message: "No user found".into() });
}

// ============================================================================
// Full stack
// ============================================================================

#[tokio::test]
async fn login_through_context_uses_profile_role() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(header("authorization", "Bearer acc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("admin")))
        .mount(&server)
        .await;

    let profiles = Arc::new(PostgrestProfiles::new(
        BackendConfig::new(server.uri(), ANON),
        auth.clone(),
    ));
    let ctx = SessionContext::start(SessionConfig::default(), kv.clone(), auth, profiles).unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _sub = ctx.synchronizer().on_session_change(move |c| {
        let _ = tx.send(c.reason);
    });

    let session = ctx.synchronizer().login("a@x.com", "secret1").await.unwrap();
    assert_eq!(session.identity.name, "Ann Smith");
    assert!(session.identity.is_admin());
    assert_eq!(kv.get("token").unwrap().as_deref(), Some(b"acc-1".as_slice()));
    assert!(kv.get(SESSION_KEY).unwrap().is_some());
    assert_eq!(rx.recv().await, Some(ChangeReason::SignedIn));
}

#[tokio::test]
async fn failed_remote_logout_forgets_provider_session() {
    let (server, kv, auth) = setup().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_json("acc-1", "ref-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json("user")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(1)
        .mount(&server)
        .await;

    let profiles = Arc::new(PostgrestProfiles::new(
        BackendConfig::new(server.uri(), ANON),
        auth.clone(),
    ));
    let ctx = SessionContext::start(SessionConfig::default(), kv.clone(), auth.clone(), profiles)
        .unwrap();

    ctx.synchronizer().login("a@x.com", "secret1").await.unwrap();
    ctx.synchronizer().logout().await.unwrap();

    assert!(kv.is_empty());
    assert_eq!(auth.get_session().await.unwrap(), None);
    assert!(!ctx.synchronizer().check_session().await);
    assert!(!ctx.session_guard().check().await.is_allowed());
}
