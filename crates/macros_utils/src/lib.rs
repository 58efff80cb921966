#[cfg(feature = "actix")]
pub use actix_web;

/// Generate a `routes` function registering the listed handlers.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     route ping_route,
/// }
/// // later: App::new().configure(health::routes)
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $name:path),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $( cfg.service($name); )*
        }
    };
}
