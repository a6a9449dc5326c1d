/// Data models for phone authentication
pub mod delivery_log;
pub mod otp;
pub mod refresh_token;
pub mod user;

pub use delivery_log::{DeliveryMetadata, DeliveryStatus, NewDeliveryLog, SmsDeliveryLog};
pub use otp::OtpRecord;
pub use refresh_token::{ClientInfo, RefreshToken};
pub use user::User;
