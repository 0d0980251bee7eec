pub mod error;
pub mod messages;
pub mod response;
pub mod state;

pub use state::AppState;

use axum::{
    Router,
    http::{Method, Uri},
    routing::{get, post},
};

use error::ApiError;

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(messages::health))
        .route("/api/status", get(messages::get_status))
        .route("/api/send-message", post(messages::send_message))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::route_not_found(&method, uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::client::mock::MockClient;
    use crate::session::types::SessionStatus;
    use crate::AppCore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app(connected: bool) -> (Router, Arc<crate::session::manager::SessionManager>) {
        let (core, _fatal_rx) = AppCore::new(Config::default(), Arc::new(MockClient::new()));
        let core = Arc::new(core);
        core.manager.initialize().await.unwrap();
        if connected {
            core.manager.on_status(SessionStatus::LoggedIn).await;
        }
        (build_router(core.clone()), core.manager.clone())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app(false).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Server is running");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (app, _) = test_app(true).await;
        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["connected"], true);
        assert_eq!(json["data"]["sessionName"], "whatsapp-gateway");
        assert_eq!(json["data"]["reconnectAttempts"], 0);
    }

    #[tokio::test]
    async fn test_send_message_success() {
        let (app, _) = test_app(true).await;
        let response = app
            .oneshot(post_json(
                "/api/send-message",
                serde_json::json!({"number": " 11987654321 ", "message": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["messageId"], "mock-1");
        assert_eq!(json["data"]["to"], "11987654321");
    }

    #[tokio::test]
    async fn test_send_message_missing_number() {
        let (app, _) = test_app(true).await;
        let response = app
            .oneshot(post_json(
                "/api/send-message",
                serde_json::json!({"message": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("number"));
    }

    #[tokio::test]
    async fn test_send_message_empty_message() {
        let (app, _) = test_app(true).await;
        let response = app
            .oneshot(post_json(
                "/api/send-message",
                serde_json::json!({"number": "11987654321", "message": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("message"));
    }

    #[tokio::test]
    async fn test_send_message_not_connected() {
        let (app, _) = test_app(false).await;
        let response = app
            .oneshot(post_json(
                "/api/send-message",
                serde_json::json!({"number": "11987654321", "message": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "session is not connected");
        if cfg!(debug_assertions) {
            assert!(json["stack"].is_string());
        }
    }

    #[tokio::test]
    async fn test_unmatched_route() {
        let (app, _) = test_app(false).await;
        let response = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Route not found: GET /api/nope");
    }
}
