use actix_web::web::ServiceConfig;

mod health;
mod ping;
mod status;

pub fn routes(cfg: &mut ServiceConfig) {
    health::routes(cfg);
    ping::routes(cfg);
    status::routes(cfg);
}
