/// Error when the external store failed to execute a statement.
///
/// Wraps the offending SQL and propagates; there is no retry at this level.
#[derive(Debug)]
pub(super) struct StorageError {
    pub(super) sql: String,
    pub(super) detail: String,
}

impl std::error::Error for StorageError {}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "failed to execute `{}`: {}", self.sql, self.detail)
    }
}
