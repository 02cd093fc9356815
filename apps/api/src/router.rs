use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use doctor_cell::router::{doctor_routes, schedule_routes};
use shared_database::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/schedules", schedule_routes(state.clone()))
        .nest("/appointments", appointment_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use shared_database::Database;
    use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

    async fn app() -> (Router, String) {
        let config = TestConfig::default();
        let db = Database::in_memory().await.unwrap();
        let state = AppState::new(config.to_app_config(), db);
        (create_router(state), config.jwt_secret)
    }

    #[tokio::test]
    async fn test_liveness_needs_no_token() {
        let (router, _) = app().await;
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Clinic scheduling API is running!");
    }

    #[tokio::test]
    async fn test_cells_are_mounted() {
        let (router, secret) = app().await;
        let bearer = JwtTestUtils::bearer(&TestUser::admin(), &secret);

        for uri in ["/doctors", "/schedules", "/appointments"] {
            let request = Request::builder()
                .uri(uri)
                .header("Authorization", bearer.clone())
                .body(Body::empty())
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }

        let response = router
            .oneshot(Request::builder().uri("/appointments").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
