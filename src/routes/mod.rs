pub mod conversations;
pub mod messages;
pub mod users;
pub mod wsroute;

use actix_web::web;

/// Register every HTTP and WebSocket route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(users::upsert_me)
        .service(conversations::get_conversations)
        .service(conversations::create_conversation)
        .service(conversations::delete_conversation)
        .service(conversations::leave_conversation)
        .service(conversations::get_watermarks)
        .service(conversations::mark_read)
        .service(messages::get_messages)
        .service(messages::send_message)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(|| async { "OK" }));
}
