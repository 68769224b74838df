use api::AppState;
use services::billing::{BillingServiceConfig, BillingServiceImpl, RazorpayGateway};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api=debug,services=debug,database=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting payments API server...");

    // Load configuration from environment
    let config = config::Config::from_env();

    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host.as_deref().unwrap_or("localhost"),
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);

    if !config.razorpay.is_configured() {
        tracing::warn!("Razorpay credentials are not fully configured; provider calls will fail");
    }

    // Create database and run migrations
    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database).await?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;

    // Get repositories
    let user_repo = db.user_repository();
    let payment_repo = db.payment_repository();
    let session_repo = db.session_repository();

    // Create services
    tracing::info!("Initializing services...");
    let gateway = Arc::new(RazorpayGateway::new(
        config.razorpay.key_id.clone(),
        config.razorpay.key_secret.clone(),
        config.razorpay.api_base_url.clone(),
    )?);

    let billing_service = Arc::new(BillingServiceImpl::new(BillingServiceConfig {
        user_repo: user_repo.clone(),
        payment_repo,
        gateway,
        payment_secret: config.razorpay.payment_secret.clone(),
        plan_id: config.razorpay.plan_id.clone(),
    }));

    // Create application state
    let app_state = AppState {
        billing_service: billing_service as Arc<dyn services::billing::ports::BillingService>,
        user_repository: user_repo,
        session_repository: session_repo,
        razorpay_key_id: config.razorpay.key_id.clone(),
    };

    // Create router
    let app = api::routes::create_router_with_cors(app_state, config.cors.clone()).merge(
        SwaggerUi::new("/docs").url("/api-docs/openapi.json", api::ApiDoc::openapi()),
    );

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
