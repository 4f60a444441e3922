/// Error for a malformed class or attribute registration.
///
/// Raised while the registry is being built; callers are expected to treat it
/// as fatal since the data model itself is inconsistent.
#[derive(Debug)]
pub(super) struct DefinitionError {
    pub(super) class: String,
    pub(super) detail: String,
}

impl std::error::Error for DefinitionError {}

impl core::fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "invalid definition of class '{}': {}",
            self.class, self.detail
        )
    }
}
