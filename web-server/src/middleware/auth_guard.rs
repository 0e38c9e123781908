// web-server/src/middleware/auth_guard.rs
use std::fmt;
use std::sync::Arc;
use actix_web::{
    body::EitherBody,
    cookie::{time::Duration as CookieDuration, Cookie, SameSite},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header::HeaderName, StatusCode},
    Error, HttpResponse, ResponseError,
};
use common::{AuthConfig, AuthMode, SharedSecret};
use futures_util::future::{ready, LocalBoxFuture, Ready};

/// Where a request carried (or tried to carry) the shared secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChannel {
    Header,
    Query,
    Cookie,
}

impl fmt::Display for AuthChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthChannel::Header => write!(f, "header"),
            AuthChannel::Query => write!(f, "query"),
            AuthChannel::Cookie => write!(f, "cookie"),
        }
    }
}

/// Extraction rules, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub mode: AuthMode,
    pub header_name: HeaderName,
    pub query_param: String,
    pub cookie_name: String,
    pub cookie_max_age: i64,
}

impl AuthPolicy {
    pub fn from_config(auth: &AuthConfig) -> Result<Self, common::ShellError> {
        let header_name = HeaderName::from_bytes(auth.header_name.as_bytes())
            .map_err(|e| common::ShellError::Config(format!("invalid auth header name: {}", e)))?;

        Ok(Self {
            mode: auth.mode,
            header_name,
            query_param: auth.query_param.clone(),
            cookie_name: auth.cookie_name.clone(),
            cookie_max_age: auth.cookie_max_age,
        })
    }

    // Header mode answers 403 and query/cookie mode 401. Combined mode tells
    // a wrong secret (403) apart from a missing one (401).
    fn rejection_status(&self, presented: bool) -> StatusCode {
        match self.mode {
            AuthMode::Header => StatusCode::FORBIDDEN,
            AuthMode::QueryCookie => StatusCode::UNAUTHORIZED,
            AuthMode::Combined if presented => StatusCode::FORBIDDEN,
            AuthMode::Combined => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Request failed authentication. Never carries the secret.
#[derive(Debug, thiserror::Error)]
#[error("The auth key is invalid.")]
pub struct AuthRejected {
    pub attempted: Vec<AuthChannel>,
    pub status: StatusCode,
}

impl From<&AuthRejected> for common::ShellError {
    fn from(rejected: &AuthRejected) -> Self {
        let channel = if rejected.attempted.is_empty() {
            "none".to_string()
        } else {
            rejected
                .attempted
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("+")
        };
        common::ShellError::AuthRejected { channel }
    }
}

impl ResponseError for AuthRejected {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status)
            .content_type("text/plain")
            .body(self.to_string())
    }
}

/// Check the request against the shared secret, returning the channel that
/// carried a matching value.
pub fn authenticate(
    req: &ServiceRequest,
    policy: &AuthPolicy,
    secret: &SharedSecret,
) -> Result<AuthChannel, AuthRejected> {
    let mut attempted = Vec::new();

    if policy.mode.accepts_header() {
        if let Some(value) = req.headers().get(&policy.header_name) {
            attempted.push(AuthChannel::Header);
            // Non-ASCII header bytes can never match a base64url secret
            if value.to_str().map(|v| secret.matches(v)).unwrap_or(false) {
                return Ok(AuthChannel::Header);
            }
        }
    }

    if policy.mode.accepts_query_and_cookie() {
        let from_query = url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, _)| key == policy.query_param.as_str())
            .map(|(_, value)| value.into_owned());
        if let Some(value) = from_query {
            attempted.push(AuthChannel::Query);
            if secret.matches(&value) {
                return Ok(AuthChannel::Query);
            }
        }

        if let Some(cookie) = req.cookie(&policy.cookie_name) {
            attempted.push(AuthChannel::Cookie);
            if secret.matches(cookie.value()) {
                return Ok(AuthChannel::Cookie);
            }
        }
    }

    let status = policy.rejection_status(!attempted.is_empty());
    Err(AuthRejected { attempted, status })
}

/// Pre-dispatch filter holding the process secret.
///
/// Stateless: no counters, no lockout. Every worker gets a clone that points
/// at the same immutable secret and policy.
#[derive(Debug, Clone)]
pub struct RequestAuthGuard {
    secret: SharedSecret,
    policy: Arc<AuthPolicy>,
}

impl RequestAuthGuard {
    pub fn new(secret: SharedSecret, policy: AuthPolicy) -> Self {
        Self {
            secret,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Cookie handed out after a query-string authentication so later
    /// requests don't need the secret in the address bar
    fn session_cookie(&self) -> Cookie<'static> {
        Cookie::build(self.policy.cookie_name.clone(), self.secret.expose().to_string())
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Strict)
            .max_age(CookieDuration::seconds(self.policy.cookie_max_age))
            .finish()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestAuthGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequestAuthGuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestAuthGuardMiddleware {
            service,
            guard: self.clone(),
        }))
    }
}

pub struct RequestAuthGuardMiddleware<S> {
    service: S,
    guard: RequestAuthGuard,
}

impl<S, B> Service<ServiceRequest> for RequestAuthGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match authenticate(&req, &self.guard.policy, &self.guard.secret) {
            Ok(channel) => {
                tracing::debug!("Authenticated {} {} via {}", req.method(), req.path(), channel);

                let fut = self.service.call(req);
                let cookie = match channel {
                    AuthChannel::Query => Some(self.guard.session_cookie()),
                    _ => None,
                };

                Box::pin(async move {
                    let mut res = fut.await?;
                    if let Some(cookie) = cookie {
                        if let Err(e) = res.response_mut().add_cookie(&cookie) {
                            tracing::warn!("Failed to attach session cookie: {}", e);
                        }
                    }
                    Ok(res.map_into_left_body())
                })
            }
            Err(rejected) => {
                tracing::warn!(
                    method = %req.method(),
                    path = %req.path(),
                    status = rejected.status.as_u16(),
                    "{}",
                    common::ShellError::from(&rejected)
                );

                let res = req.error_response(rejected).map_into_right_body();
                Box::pin(async move { Ok(res) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use common::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "abc123";

    fn guard(mode: AuthMode) -> RequestAuthGuard {
        let mut auth = Config::default().auth;
        auth.mode = mode;
        RequestAuthGuard::new(
            SharedSecret::new(SECRET.to_string()),
            AuthPolicy::from_config(&auth).unwrap(),
        )
    }

    macro_rules! guarded_app {
        ($mode:expr, $hits:expr) => {{
            let hits = $hits.clone();
            test::init_service(
                App::new()
                    .wrap(guard($mode))
                    .app_data(web::Data::new(hits))
                    .route(
                        "/landing",
                        web::get().to(|hits: web::Data<Arc<AtomicUsize>>| async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            HttpResponse::Ok().body("landed")
                        }),
                    ),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn test_header_mode_forwards_matching_secret() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::Header, hits);

        let req = test::TestRequest::get()
            .uri("/landing")
            .insert_header(("X-App-Csrf-Token", SECRET))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(test::read_body(res).await, "landed");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_header_mode_rejects_wrong_or_missing_secret() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::Header, hits);

        let req = test::TestRequest::get()
            .uri("/landing")
            .insert_header(("X-App-Csrf-Token", "abc124"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let body = test::read_body(res).await;
        assert!(!String::from_utf8_lossy(&body).contains(SECRET));

        let req = test::TestRequest::get().uri("/landing").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_header_mode_ignores_query_and_cookie() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::Header, hits);

        let req = test::TestRequest::get()
            .uri("/landing?authKey=abc123")
            .cookie(Cookie::new("Auth", SECRET))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_query_mode_issues_session_cookie() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::QueryCookie, hits);

        let req = test::TestRequest::get()
            .uri("/landing?authKey=abc123")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);

        let cookie = res
            .response()
            .cookies()
            .find(|c| c.name() == "Auth")
            .expect("session cookie should be set");
        assert_eq!(cookie.value(), SECRET);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(86400)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_query_mode_accepts_cookie_without_reissuing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::QueryCookie, hits);

        let req = test::TestRequest::get()
            .uri("/landing")
            .cookie(Cookie::new("Auth", SECRET))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.response().cookies().next().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_query_mode_rejects_with_401() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::QueryCookie, hits);

        for req in [
            test::TestRequest::get().uri("/landing").to_request(),
            test::TestRequest::get().uri("/landing?authKey=abc124").to_request(),
            test::TestRequest::get()
                .uri("/landing")
                .cookie(Cookie::new("Auth", "abc124"))
                .to_request(),
            test::TestRequest::get()
                .uri("/landing")
                .insert_header(("X-App-Csrf-Token", SECRET))
                .to_request(),
        ] {
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_combined_mode_distinguishes_missing_from_wrong() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = guarded_app!(AuthMode::Combined, hits);

        let req = test::TestRequest::get().uri("/landing").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/landing")
            .insert_header(("X-App-Csrf-Token", "abc124"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        // A wrong header does not hide a valid cookie
        let req = test::TestRequest::get()
            .uri("/landing")
            .insert_header(("X-App-Csrf-Token", "abc124"))
            .cookie(Cookie::new("Auth", SECRET))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_query_value_is_url_decoded() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut auth = Config::default().auth;
        auth.mode = AuthMode::QueryCookie;
        let guard = RequestAuthGuard::new(
            SharedSecret::new("a b".to_string()),
            AuthPolicy::from_config(&auth).unwrap(),
        );
        let hits_data = web::Data::new(hits.clone());
        let app = test::init_service(
            App::new()
                .wrap(guard)
                .app_data(hits_data)
                .route(
                    "/landing",
                    web::get().to(|hits: web::Data<Arc<AtomicUsize>>| async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::Ok().finish()
                    }),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/landing?authKey=a%20b").to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_rejection_maps_to_shell_error() {
        let rejected = AuthRejected {
            attempted: vec![AuthChannel::Query, AuthChannel::Cookie],
            status: StatusCode::UNAUTHORIZED,
        };
        let err = common::ShellError::from(&rejected);
        assert!(matches!(
            err,
            common::ShellError::AuthRejected { ref channel } if channel == "query+cookie"
        ));
        assert!(!err.is_fatal());
    }

    #[actix_web::test]
    async fn test_rejects_invalid_header_name() {
        let mut auth = Config::default().auth;
        auth.header_name = "bad header".to_string();
        assert!(AuthPolicy::from_config(&auth).is_err());
    }
}
