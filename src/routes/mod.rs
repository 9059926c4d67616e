pub mod billing;
pub mod credits;
pub mod not_found;
pub mod webhook;

use actix_web::{HttpResponse, get, middleware, web};

use crate::errors::CoreError;

#[get("/")]
pub async fn index_get() -> Result<HttpResponse, CoreError> {
    Ok(HttpResponse::Ok().body("Hello, world!"))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/credits")
            .wrap(middleware::NormalizePath::trim())
            .configure(credits::config),
    );
    cfg.service(
        web::scope("")
            .wrap(middleware::NormalizePath::trim())
            .configure(billing::config),
    );
    cfg.service(
        web::scope("")
            .wrap(middleware::NormalizePath::trim())
            .configure(webhook::config),
    );
    cfg.service(web::scope("").service(index_get));
}
