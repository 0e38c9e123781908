// web-server/src/api/mod.rs
pub mod bridge;
pub mod landing;

pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(landing::root)
        .service(landing::landing)
        .service(landing::healthcheck)
        .service(
            actix_web::web::scope("/api")
                .service(bridge::ask)
                .service(bridge::session_info)
        );
}
