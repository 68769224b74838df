mod payment_repository;
mod session_repository;
mod user_repository;

pub use payment_repository::PostgresPaymentRepository;
pub use session_repository::PostgresSessionRepository;
pub use user_repository::PostgresUserRepository;
