/// HTTP handlers for the item relay API
pub mod items;
pub mod websocket;

use actix_web::web;

pub use items::register_routes as register_items;
pub use websocket::register_routes as register_websocket;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    register_items(cfg);
    register_websocket(cfg);
}
