/// A free-form error built from format arguments (the `err!`/`bail!` macros).
#[derive(Debug)]
pub(super) struct AdhocError {
    message: Box<str>,
}

impl AdhocError {
    pub(super) fn new(args: std::fmt::Arguments<'_>) -> Self {
        AdhocError {
            message: args.to_string().into_boxed_str(),
        }
    }
}

impl std::error::Error for AdhocError {}

impl core::fmt::Display for AdhocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(&self.message)
    }
}
