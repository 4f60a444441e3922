/// Error when an unknown class, attribute or filter code is passed at call
/// time. Never silently defaulted.
#[derive(Debug)]
pub(super) struct UnknownError {
    pub(super) class: String,
    pub(super) code: Option<String>,
    pub(super) what: &'static str,
}

impl std::error::Error for UnknownError {}

impl core::fmt::Display for UnknownError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "unknown {} '{}' for class '{}'", self.what, code, self.class),
            None => write!(f, "unknown class '{}'", self.class),
        }
    }
}
