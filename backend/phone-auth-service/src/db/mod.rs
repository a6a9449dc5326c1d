/// Persistence for OTP state, delivery audit, sessions and accounts
///
/// Every store is a trait with a PostgreSQL implementation for deployments
/// and an in-memory one for development and tests.
pub mod memory;
pub mod otp_codes;
pub mod refresh_tokens;
pub mod sms_delivery_logs;
pub mod users;

pub use memory::{MemoryDeliveryLogStore, MemoryOtpStore, MemoryRefreshTokenStore, MemoryUserStore};
pub use otp_codes::{OtpStore, PgOtpStore};
pub use refresh_tokens::{PgRefreshTokenStore, RefreshTokenStore};
pub use sms_delivery_logs::{DeliveryLogStore, PgDeliveryLogStore};
pub use users::{PgUserStore, UserStore};
