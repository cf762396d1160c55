use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// Paths are served from the root; neighbors call them directly.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chain", web::get().to(handlers::get_chain))
        .service(
            web::resource("/transactions")
                .route(web::get().to(handlers::get_transactions))
                .route(web::post().to(handlers::create_transaction))
                .route(web::put().to(handlers::add_transaction))
                .route(web::delete().to(handlers::clear_transactions)),
        )
        .route("/consensus", web::put().to(handlers::consensus))
        .route("/mine", web::post().to(handlers::mine_block))
        .route("/amount", web::get().to(handlers::get_amount))
        .route("/wallet", web::post().to(handlers::create_wallet))
        .route(
            "/wallet/transactions",
            web::post().to(handlers::create_wallet_transaction),
        );
}
