use actix_web::{HttpResponse, Responder, get, web};
use deadman::Orchestrator;
use serde_json::json;

macros_utils::routes! {
    route health_route,
}

/// Health check route
/// The status code is what load balancers look at; the body is for humans.
#[get("/")]
pub async fn health_route(engine: web::Data<Orchestrator>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "queued_alerts": engine.pending_alerts(),
    }))
}
