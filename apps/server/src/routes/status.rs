use actix_web::{HttpResponse, get, web};
use deadman::Orchestrator;
use uuid::Uuid;

use crate::error::ApiError;

macros_utils::routes! {
    route status_route,
    route alerts_route,
}

#[get("/monitors/{id}/status")]
pub async fn status_route(id: web::Path<Uuid>, engine: web::Data<Orchestrator>) -> Result<HttpResponse, ApiError> {
    let status = engine.get_status(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// Notification attempts for a monitor, oldest first
#[get("/monitors/{id}/alerts")]
pub async fn alerts_route(id: web::Path<Uuid>, engine: web::Data<Orchestrator>) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    engine.get_status(id).await?;
    let records = engine.alert_history(id).await?;
    Ok(HttpResponse::Ok().json(records))
}
