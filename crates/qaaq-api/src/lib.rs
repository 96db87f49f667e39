pub mod auth;
pub mod chat;
pub mod convert;
pub mod error;
pub mod groups;
pub mod middleware;
pub mod otp;
pub mod posts;
pub mod qbot;
pub mod questions;
pub mod rank;
pub mod state;
pub mod users;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use qaaq_types::api::ClientConfig;

use crate::middleware::require_auth;
use crate::state::AppState;

/// REST routes under `/api`. WebSocket endpoints are mounted by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/merge", post(auth::merge_accounts))
        .route("/api/auth/password-reset", post(auth::request_password_reset))
        .route("/api/auth/password-reset/confirm", post(auth::confirm_password_reset))
        .route("/api/config", get(client_config));

    let protected_routes = Router::new()
        // Account
        .route("/api/auth/verify", post(auth::verify_otp))
        .route("/api/auth/resend-otp", post(auth::resend_otp))
        .route("/api/auth/set-password", post(auth::set_password))
        // Users and map
        .route("/api/users/me", get(users::get_me).patch(users::update_me))
        .route("/api/users/me/location", post(users::update_location))
        .route("/api/users/search", get(users::search_users))
        .route("/api/users/nearby", get(users::nearby_users))
        .route("/api/users/{user_id}", get(users::get_user))
        // Direct chat
        .route("/api/chat/connections", get(chat::list_connections).post(chat::create_connection))
        .route("/api/chat/connections/{connection_id}/accept", post(chat::accept_connection))
        .route("/api/chat/connections/{connection_id}/reject", post(chat::reject_connection))
        .route(
            "/api/chat/connections/{connection_id}/messages",
            get(chat::get_messages).post(chat::send_message),
        )
        .route("/api/chat/connections/{connection_id}/read", post(chat::mark_read))
        // Groups
        .route("/api/groups", get(groups::list_groups))
        .route("/api/groups/mine", get(groups::my_groups))
        .route("/api/groups/rank/auto-join", post(groups::auto_join_rank))
        .route("/api/groups/cpss/join", post(groups::join_cpss))
        .route("/api/groups/{group_id}", get(groups::get_group))
        .route("/api/groups/{group_id}/join", post(groups::join_group))
        .route("/api/groups/{group_id}/leave", post(groups::leave_group))
        .route("/api/groups/{group_id}/members", get(groups::group_members))
        .route(
            "/api/groups/{group_id}/posts",
            get(posts::list_group_posts).post(posts::create_group_post),
        )
        // Feed
        .route("/api/posts", get(posts::list_feed).post(posts::create_feed_post))
        .route("/api/posts/{post_id}/like", post(posts::toggle_like))
        // Q&A
        .route("/api/questions", get(questions::list_questions).post(questions::create_question))
        .route("/api/questions/{question_id}", get(questions::get_question))
        .route("/api/questions/{question_id}/answers", post(questions::create_answer))
        .route(
            "/api/questions/{question_id}/answers/{answer_id}/accept",
            post(questions::accept_answer),
        )
        // QBOT
        .route("/api/qbot/chat", post(qbot::chat))
        .route("/api/qbot/history", get(qbot::history).delete(qbot::clear_history))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new().merge(public_routes).merge(protected_routes).with_state(state)
}

async fn client_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(ClientConfig {
        google_maps_api_key: state.google_maps_api_key.clone(),
        ais_enabled: state.ais_enabled,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use qaaq_db::Database;
    use qaaq_gateway::dispatcher::Dispatcher;

    use super::*;
    use crate::otp::OtpSender;
    use crate::qbot::QbotClient;
    use crate::state::AppStateInner;

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            otp: OtpSender::new(None, None),
            qbot: QbotClient::new(None, None, None),
            google_maps_api_key: Some("maps-key".into()),
            ais_enabled: false,
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn register(app: &Router, name: &str, phone: &str, rank: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "full_name": name,
                "whatsapp_number": phone,
                "user_type": "sailor",
                "rank": rank,
                "password": "seaworthy",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (body["token"].as_str().unwrap().to_string(), body["user"]["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn config_is_public() {
        let app = router(test_state());
        let (status, body) = call(&app, "GET", "/api/config", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["google_maps_api_key"], "maps-key");
        assert_eq!(body["ais_enabled"], false);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = router(test_state());
        let (status, body) = call(&app, "GET", "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(&app, "GET", "/api/users/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_login_and_rank_group() {
        let app = router(test_state());
        let (token, id) = register(&app, "Ravi Kumar", "+91 98765 43210", "C/E").await;

        let (status, me) = call(&app, "GET", "/api/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], id.as_str());
        assert_eq!(me["whatsapp_number"], "+919876543210");

        // Registration joined the matching rank group
        let (_, mine) = call(&app, "GET", "/api/groups/mine", Some(&token), None).await;
        assert_eq!(mine[0]["rank_key"], "chief_engineer");

        let (status, body) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "identifier": "919876543210", "password": "seaworthy" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requires_password_setup"], false);

        let (status, _) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "identifier": "919876543210", "password": "wrong-one" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn starter_password_works_once() {
        let state = test_state();
        state
            .db
            .create_user(&qaaq_db::models::NewUser {
                id: uuid::Uuid::new_v4().to_string(),
                full_name: "Imported Sailor".into(),
                whatsapp_number: Some("+447700900123".into()),
                user_type: "sailor".into(),
                ..Default::default()
            })
            .unwrap();
        let app = router(state);
        let login = json!({ "identifier": "+447700900123", "password": auth::STARTER_PASSWORD });

        let (status, body) = call(&app, "POST", "/api/auth/login", None, Some(login.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requires_password_setup"], true);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            "POST",
            "/api/auth/set-password",
            Some(&token),
            Some(json!({ "password": "new-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "identifier": "+447700900123", "password": "new-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn otp_verifies_account_and_resets_password() {
        let state = test_state();
        let app = router(state.clone());
        let (token, id) = register(&app, "Verify Me", "+15550000051", "").await;

        state
            .db
            .insert_otp("otp-1", &id, otp::PURPOSE_VERIFY, &otp::hash_code("123456"), 10)
            .unwrap();
        let (status, _) = call(&app, "POST", "/api/auth/verify", Some(&token), Some(json!({ "code": "000000" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, me) = call(&app, "POST", "/api/auth/verify", Some(&token), Some(json!({ "code": "123456" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["is_verified"], true);

        state
            .db
            .insert_otp("otp-2", &id, otp::PURPOSE_PASSWORD_RESET, &otp::hash_code("654321"), 10)
            .unwrap();
        let reset = json!({ "identifier": "+15550000051", "code": "654321", "new_password": "fresh-pass" });
        let (status, body) = call(&app, "POST", "/api/auth/password-reset/confirm", None, Some(reset)).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let login = json!({ "identifier": "+15550000051", "password": "fresh-pass" });
        let (status, _) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn shared_identifier_requires_merge() {
        let app = router(test_state());
        let (_, first) = register(&app, "Old Account", "+919000000001", "Bosun").await;
        let (_, second) = register(&app, "New Account", "+919000000001", "AB").await;

        let login = json!({ "identifier": "+919000000001", "password": "seaworthy" });
        let (status, body) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "merge_required");
        assert_eq!(body["candidates"].as_array().unwrap().len(), 2);

        // Wrong password reveals nothing
        let login = json!({ "identifier": "+919000000001", "password": "guess-again" });
        let (status, body) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("candidates").is_none());

        let merge = json!({
            "identifier": "+919000000001",
            "password": "seaworthy",
            "primary_id": first,
            "duplicate_ids": [second],
        });
        let (status, body) = call(&app, "POST", "/api/auth/merge", None, Some(merge)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["user"]["id"], first.as_str());

        let login = json!({ "identifier": "+919000000001", "password": "seaworthy" });
        let (status, _) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn starter_password_cannot_claim_a_shared_number() {
        let app = router(test_state());
        let (_, owner) = register(&app, "Number Owner", "+919111111111", "Master").await;
        let (status, body) = call(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({ "full_name": "Squatter", "whatsapp_number": "+919111111111", "user_type": "sailor" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let squatter = body["user"]["id"].as_str().unwrap().to_string();

        let into_owner = json!({
            "identifier": "+919111111111",
            "password": auth::STARTER_PASSWORD,
            "primary_id": owner,
            "duplicate_ids": [squatter],
        });
        let (status, body) = call(&app, "POST", "/api/auth/merge", None, Some(into_owner)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("token").is_none());

        let into_squatter = json!({
            "identifier": "+919111111111",
            "password": auth::STARTER_PASSWORD,
            "primary_id": squatter,
            "duplicate_ids": [owner],
        });
        let (status, _) = call(&app, "POST", "/api/auth/merge", None, Some(into_squatter)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The starter login opens the squatter's own account and lists nobody else
        let login = json!({ "identifier": "+919111111111", "password": auth::STARTER_PASSWORD });
        let (status, body) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["user"]["id"], squatter.as_str());
        assert!(body.get("candidates").is_none());

        let login = json!({ "identifier": "+919111111111", "password": "seaworthy" });
        let (status, body) = call(&app, "POST", "/api/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["user"]["id"], owner.as_str());
    }

    #[tokio::test]
    async fn chat_flow_between_two_users() {
        let app = router(test_state());
        let (alice, _) = register(&app, "Alice Mate", "+15550000001", "2nd Officer").await;
        let (bob, bob_id) = register(&app, "Bob Engineer", "+15550000002", "3rd Engineer").await;

        let (status, conn) = call(
            &app,
            "POST",
            "/api/chat/connections",
            Some(&alice),
            Some(json!({ "receiver_id": bob_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let conn_id = conn["id"].as_str().unwrap().to_string();

        // Asking again returns the same connection
        let (status, again) = call(
            &app,
            "POST",
            "/api/chat/connections",
            Some(&alice),
            Some(json!({ "receiver_id": bob_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["id"], conn_id.as_str());

        // Only the receiver can accept
        let accept = format!("/api/chat/connections/{}/accept", conn_id);
        let (status, _) = call(&app, "POST", &accept, Some(&alice), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, accepted) = call(&app, "POST", &accept, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");

        let messages = format!("/api/chat/connections/{}/messages", conn_id);
        let (status, _) = call(&app, "POST", &messages, Some(&alice), Some(json!({ "content": "  Ahoy!  " }))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(&app, "POST", &messages, Some(&alice), Some(json!({ "content": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = call(&app, "GET", "/api/chat/connections", Some(&bob), None).await;
        assert_eq!(list[0]["unread_count"], 1);
        assert_eq!(list[0]["last_message"]["content"], "Ahoy!");
        assert!(list[0]["peer"].get("whatsapp_number").is_none());

        let read = format!("/api/chat/connections/{}/read", conn_id);
        let (_, body) = call(&app, "POST", &read, Some(&bob), None).await;
        assert_eq!(body["updated"], 1);

        let (_, history) = call(&app, "GET", &messages, Some(&bob), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["is_read"], true);

        let (carol, _) = register(&app, "Carol Outsider", "+15550000004", "Cook").await;
        let (status, _) = call(&app, "GET", &messages, Some(&carol), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cannot_chat_with_yourself() {
        let app = router(test_state());
        let (token, id) = register(&app, "Solo Sailor", "+15550000003", "Cadet").await;
        let (status, _) = call(
            &app,
            "POST",
            "/api/chat/connections",
            Some(&token),
            Some(json!({ "receiver_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn group_posts_are_members_only() {
        let app = router(test_state());
        let (alice, _) = register(&app, "Alice Local", "+15550000011", "").await;
        let (bob, _) = register(&app, "Bob Local", "+15550000012", "").await;

        let (status, path) = call(
            &app,
            "POST",
            "/api/groups/cpss/join",
            Some(&alice),
            Some(json!({ "country": "Singapore", "port": "Jurong" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(path.as_array().unwrap().len(), 2);
        assert_eq!(path[1]["member_count"], 1);
        let group_id = path[1]["id"].as_str().unwrap().to_string();

        let posts = format!("/api/groups/{}/posts", group_id);
        let (status, _) = call(&app, "POST", &posts, Some(&alice), Some(json!({ "content": "Launch at 0600" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(&app, "GET", &posts, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "POST", &format!("/api/groups/{}/join", group_id), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, list) = call(&app, "GET", &posts, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["content"], "Launch at 0600");

        // Group posts stay out of the public feed
        let (_, feed) = call(&app, "GET", "/api/posts", Some(&bob), None).await;
        assert!(feed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn questions_accept_one_answer() {
        let app = router(test_state());
        let (asker, _) = register(&app, "Asker Cadet", "+15550000021", "Deck Cadet").await;
        let (helper, _) = register(&app, "Helper Master", "+15550000022", "Captain").await;

        let (status, q) = call(
            &app,
            "POST",
            "/api/questions",
            Some(&asker),
            Some(json!({ "title": "Gyro error?", "content": "How do I find gyro error at sea?", "tags": ["Navigation"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(q["tags"][0], "navigation");
        let qid = q["id"].as_str().unwrap().to_string();

        let answers = format!("/api/questions/{}/answers", qid);
        let (_, a) = call(&app, "POST", &answers, Some(&helper), Some(json!({ "content": "Take an azimuth." }))).await;
        let aid = a["id"].as_str().unwrap().to_string();

        let accept = format!("/api/questions/{}/answers/{}/accept", qid, aid);
        let (status, _) = call(&app, "POST", &accept, Some(&helper), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, list) = call(&app, "POST", &accept, Some(&asker), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["is_accepted"], true);

        let (_, found) = call(&app, "GET", "/api/questions?tag=navigation", Some(&helper), None).await;
        assert_eq!(found[0]["answer_count"], 1);
    }

    #[tokio::test]
    async fn qbot_answers_without_a_model() {
        let app = router(test_state());
        let (token, _) = register(&app, "Curious Oiler", "+15550000031", "Oiler").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/qbot/chat",
            Some(&token),
            Some(json!({ "message": "What is MARPOL Annex I?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["role"], "user");
        assert_eq!(body["reply"]["role"], "assistant");

        let (_, history) = call(&app, "GET", "/api/qbot/history", Some(&token), None).await;
        assert_eq!(history.as_array().unwrap().len(), 2);

        let (status, _) = call(&app, "DELETE", "/api/qbot/history", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, history) = call(&app, "GET", "/api/qbot/history", Some(&token), None).await;
        assert!(history.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nearby_uses_stored_location() {
        let app = router(test_state());
        let (alice, _) = register(&app, "Alice Nearby", "+15550000041", "").await;
        let (bob, _) = register(&app, "Bob Nearby", "+15550000042", "").await;

        let (status, _) = call(&app, "GET", "/api/users/nearby", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for (token, lat, lon) in [(&alice, 1.264, 103.84), (&bob, 1.29, 103.85)] {
            let (status, _) = call(
                &app,
                "POST",
                "/api/users/me/location",
                Some(token),
                Some(json!({ "latitude": lat, "longitude": lon, "source": "device" })),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }

        let (status, nearby) = call(&app, "GET", "/api/users/nearby?radius_km=10", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(nearby[0]["full_name"], "Bob Nearby");
        assert!(nearby[0]["distance_km"].as_f64().unwrap() < 5.0);

        let (status, _) = call(&app, "GET", "/api/users/nearby?radius_km=30000", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
