/// Error for a cross-table inconsistency that prevents a sweep from
/// completing. Ordinary findings are reported in the integrity report, not
/// as errors.
#[derive(Debug)]
pub(super) struct IntegrityError {
    pub(super) detail: String,
}

impl std::error::Error for IntegrityError {}

impl core::fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "integrity check failed: {}", self.detail)
    }
}
