use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use sqlx::postgres::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use creditcore::config::Config;
use creditcore::core::email::LoggingSender;
use creditcore::core::psp::Mollie;
use creditcore::core::background;
use creditcore::{AppState, auth::AuthAddon, routes};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());

    let pool = PgPool::connect(&config.database_url).await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations completed successfully");

    let psp: Arc<dyn creditcore::core::psp::PaymentProvider> = Arc::new(Mollie::new(config.mollie_api_key.clone()));

    background::spawn_reservation_sweep(pool.clone(), config.clone());
    background::spawn_subscription_sweep(pool.clone(), config.clone());
    background::spawn_email_dispatch(pool.clone(), config.clone(), Arc::new(LoggingSender));
    background::spawn_reconciliation(pool.clone(), config.clone(), psp.clone());

    let server_url = config.server_url.clone();

    let state = web::Data::new(AppState {
        pool,
        auth: Default::default(),
        config,
        psp,
    });

    #[derive(OpenApi)]
    #[openapi(
        paths(
            routes::credits::wallet,
            routes::credits::charge,
            routes::billing::reserve,
            routes::billing::checkout,
            routes::billing::confirm,
            routes::billing::subscribe,
            routes::billing::cancel,
            routes::billing::status,
        ),
        components(schemas(
            creditcore::core::wallet::WalletView,
            creditcore::core::wallet::ClassView,
            creditcore::core::charge::ChargeOutcome,
            creditcore::core::reservation::ReserveOutcome,
            creditcore::core::purchase::CheckoutOutcome,
            creditcore::core::subscription::CheckoutOutcome,
            creditcore::database::subscription::SubscriptionStatus,
            creditcore::models::responses::ApiError,
            creditcore::models::responses::ErrorDetail,
            routes::credits::ChargeRequest,
            routes::billing::ReserveRequest,
            routes::billing::ReserveResponse,
            routes::billing::CheckoutRequest,
            routes::billing::ConfirmResponse,
            routes::billing::SubscribeRequest,
            routes::billing::SubscriptionStatusView,
        )),
        modifiers(&AuthAddon),
    )]
    struct ApiDocs;

    let http_server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(["GET", "POST", "PUT"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .wrap(cors)
            .service(web::redirect("/swagger-ui", "/swagger-ui/"))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDocs::openapi()),
            )
            .configure(routes::config)
            .default_service(web::route().to(routes::not_found::not_found))
    })
    .bind(&server_url)?
    .run();

    http_server.await?;

    Ok(())
}
