pub mod ports;
pub mod razorpay;
pub mod service;

pub use ports::{BillingError, BillingProviderGateway, BillingService, PaymentRepository};
pub use razorpay::RazorpayGateway;
pub use service::{BillingServiceConfig, BillingServiceImpl};
