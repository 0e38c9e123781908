// web-server/src/api/landing.rs
use actix_web::{get, http::header, HttpResponse, Responder};

// Minimal UI shell. Page scripts never see the secret; the engine attaches it
// to outgoing requests, or the session cookie carries it.
const LANDING_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Loopback Shell</title>
  </head>
  <body>
    <h1>Loopback Shell</h1>
    <p id="reply"></p>
    <script>
      fetch('/api/ask', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ msg: 'Hello from the page' })
      })
        .then(r => r.json())
        .then(j => { document.getElementById('reply').textContent = j.response; });
    </script>
  </body>
</html>
"#;

#[get("/")]
pub async fn root() -> impl Responder {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/landing"))
        .finish()
}

#[get("/landing")]
pub async fn landing() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(LANDING_HTML)
}

// Liveness check for tooling that already holds the secret
#[get("/healthcheck")]
pub async fn healthcheck() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}
