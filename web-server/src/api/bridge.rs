// web-server/src/api/bridge.rs
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{get, post, web, HttpResponse, Responder};
use common::models::session::SessionInfo;
use serde::Deserialize;
use serde_json::json;

/// Number of page messages answered in this process
#[derive(Debug, Default)]
pub struct AskCounter(AtomicUsize);

impl AskCounter {
    fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub msg: String,
}

// Page-to-native message bridge
#[post("/ask")]
pub async fn ask(
    body: web::Json<AskRequest>,
    counter: web::Data<AskCounter>,
) -> impl Responder {
    tracing::info!("Page said: {}", body.msg);

    HttpResponse::Ok().json(json!({
        "response": format!("Hello from Rust ({})", counter.next())
    }))
}

// Fingerprint and mode of the running session. Never includes the secret.
#[get("/session")]
pub async fn session_info(info: web::Data<SessionInfo>) -> impl Responder {
    HttpResponse::Ok().json(info.get_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};
    use common::AuthMode;
    use serde_json::Value;

    fn app_data() -> (web::Data<AskCounter>, web::Data<SessionInfo>) {
        (
            web::Data::new(AskCounter::default()),
            web::Data::new(SessionInfo::new("ab".repeat(32), "cd".repeat(32), AuthMode::Header, false)),
        )
    }

    #[actix_web::test]
    async fn test_ask_counts_replies() {
        let (counter, session) = app_data();
        let app = test::init_service(
            App::new()
                .app_data(counter)
                .app_data(session)
                .configure(crate::api::configure),
        )
        .await;

        for expected in ["Hello from Rust (0)", "Hello from Rust (1)"] {
            let req = test::TestRequest::post()
                .uri("/api/ask")
                .set_json(json!({ "msg": "hi" }))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["response"], expected);
        }
    }

    #[actix_web::test]
    async fn test_ask_requires_msg() {
        let (counter, session) = app_data();
        let app = test::init_service(
            App::new()
                .app_data(counter)
                .app_data(session)
                .configure(crate::api::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/ask")
            .set_json(json!({ "message": "hi" }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_session_info_and_landing() {
        let (counter, session) = app_data();
        let app = test::init_service(
            App::new()
                .app_data(counter)
                .app_data(session)
                .configure(crate::api::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/session").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["fingerprint"], "ab".repeat(32));
        assert_eq!(body["public_key_fingerprint"], "cd".repeat(32));
        assert_eq!(body["auth_mode"], "header");

        let req = test::TestRequest::get().uri("/").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FOUND);

        let req = test::TestRequest::get().uri("/landing").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = test::read_body(res).await;
        assert!(String::from_utf8_lossy(&body).contains("Loopback Shell"));
    }
}
