/// Security primitives for phone authentication
///
/// - **rate_limiter**: fixed-window attempt counters (Redis or in-process)
/// - **otp_hash**: keyed hashing and constant-time comparison of codes
pub mod otp_hash;
pub mod rate_limiter;

pub use otp_hash::OtpHasher;
pub use rate_limiter::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
