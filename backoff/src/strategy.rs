/// Exponentially growing intervals with jitter, bounded by attempts and elapsed time.
pub mod exponential;

#[cfg(test)]
pub(crate) mod fixed;
