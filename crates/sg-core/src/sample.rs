//! Sample type definitions

/// Type alias for stored samples. The store never interprets the value.
pub type Sample = i32;

/// Number of significant bits producers put into a sample
pub const SAMPLE_BITS: u32 = 24;

/// Lowest sample value a producer should generate
pub const SAMPLE_MIN: Sample = -(1 << (SAMPLE_BITS - 1));

/// Highest sample value a producer should generate
pub const SAMPLE_MAX: Sample = (1 << (SAMPLE_BITS - 1)) - 1;

/// Memory footprint of one stored sample
pub const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

/// Bytes needed to hold `count` samples
#[inline]
pub const fn samples_to_bytes(count: usize) -> usize {
    count.saturating_mul(SAMPLE_BYTES)
}
