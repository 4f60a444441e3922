/// Error when a bound-parameter placeholder has no supplied value.
///
/// The compiler attaches the canonical query text before propagating, so the
/// offending query can be identified from the error message alone.
#[derive(Debug)]
pub(super) struct MissingArgumentError {
    pub(super) name: String,
    pub(super) query: Option<String>,
}

impl std::error::Error for MissingArgumentError {}

impl core::fmt::Display for MissingArgumentError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "missing query argument '{}'", self.name)?;
        if let Some(ref query) = self.query {
            write!(f, " in: {query}")?;
        }
        Ok(())
    }
}
