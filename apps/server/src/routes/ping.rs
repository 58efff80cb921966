use actix_web::{HttpResponse, get, post, web};
use deadman::Orchestrator;
use uuid::Uuid;

use crate::error::ApiError;

macros_utils::routes! {
    route ping_get_route,
    route ping_post_route,
}

/// Check-in for clients that can only issue GET (curl in cron, uptime pingers)
#[get("/ping/{id}")]
pub async fn ping_get_route(id: web::Path<Uuid>, engine: web::Data<Orchestrator>) -> Result<HttpResponse, ApiError> {
    ping(id.into_inner(), &engine).await
}

#[post("/ping/{id}")]
pub async fn ping_post_route(id: web::Path<Uuid>, engine: web::Data<Orchestrator>) -> Result<HttpResponse, ApiError> {
    ping(id.into_inner(), &engine).await
}

async fn ping(id: Uuid, engine: &Orchestrator) -> Result<HttpResponse, ApiError> {
    let receipt = engine.handle_ping(id, None).await?;
    Ok(HttpResponse::Ok().json(receipt))
}
