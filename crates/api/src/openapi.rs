use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "LMS Payments API",
        description = "Subscription billing backend for the learning platform.",
        version = "1.0.0",
        license(name = "MIT",)
    ),
    paths(
        crate::routes::payments::subscribe,
        crate::routes::payments::verify_payment,
        crate::routes::payments::unsubscribe,
        crate::routes::payments::get_razorpay_key,
        crate::routes::payments::list_payments,
    ),
    components(schemas(
        crate::routes::payments::SubscribeResponse,
        crate::routes::payments::VerifyPaymentRequest,
        crate::routes::payments::VerifyPaymentResponse,
        crate::routes::payments::UnsubscribeResponse,
        crate::routes::payments::RazorpayKeyResponse,
        crate::routes::payments::ListPaymentsResponse,
        crate::error::ApiErrorResponse,
        services::billing::ports::ProviderSubscriptionItem,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Payments", description = "Subscription purchase, verification and cancellation"),
        (name = "Health", description = "Service health endpoints")
    )
)]
pub struct ApiDoc;

/// Security scheme addon for Bearer token authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("session_token")
                        .description(Some("Session token obtained at login"))
                        .build(),
                ),
            )
        }
    }
}
