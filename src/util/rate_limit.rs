//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Invoice scans started per minute, server wide
pub const OCR_SCANS_PER_MINUTE: u32 = 10;

pub fn create_ocr_limiter() -> Arc<Limiter> {
    let quota = Quota::per_minute(NonZeroU32::new(OCR_SCANS_PER_MINUTE).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}
