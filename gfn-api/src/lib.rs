// builders + test fixtures
pub mod builders;

#[cfg(feature = "test-utils")]
pub mod test_utils;
