mod adhoc;
mod definition;
mod integrity;
mod missing_argument;
mod storage;
mod unknown;

use adhoc::AdhocError;
use definition::DefinitionError;
use integrity::IntegrityError;
use missing_argument::MissingArgumentError;
use std::sync::Arc;
use storage::StorageError;
use unknown::UnknownError;

/// Creates an [`Error`] from format arguments.
#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        $crate::Error::from_args(format_args!($($arg)*))
    };
}

/// Returns early with an [`Error`] built from format arguments.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::from_args(format_args!($($arg)*)))
    };
}

/// An error that can occur in strata.
///
/// Kept at one word so it is cheap to return; the payload lives behind an
/// `Arc` and errors can be chained with [`Error::context`].
#[derive(Clone)]
pub struct Error {
    inner: Option<Arc<ErrorInner>>,
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
    cause: Option<Error>,
}

#[derive(Debug)]
enum ErrorKind {
    /// Malformed class/attribute registration. Fatal at startup.
    Definition(DefinitionError),

    /// Invalid class, attribute or filter code passed at call time.
    Unknown(UnknownError),

    /// A bound-parameter placeholder has no supplied value.
    MissingArgument(MissingArgumentError),

    /// The external store failed to execute a statement.
    Storage(StorageError),

    /// Cross-table inconsistency reported by the integrity checker.
    Integrity(IntegrityError),

    Adhoc(AdhocError),
    Anyhow(anyhow::Error),
    Opaque,
}

impl Error {
    #[doc(hidden)]
    pub fn from_args(args: std::fmt::Arguments<'_>) -> Error {
        ErrorKind::Adhoc(AdhocError::new(args)).into()
    }

    pub fn definition(class: impl Into<String>, detail: impl Into<String>) -> Error {
        ErrorKind::Definition(DefinitionError {
            class: class.into(),
            detail: detail.into(),
        })
        .into()
    }

    pub fn unknown_class(class: impl Into<String>) -> Error {
        ErrorKind::Unknown(UnknownError {
            class: class.into(),
            code: None,
            what: "class",
        })
        .into()
    }

    pub fn unknown_attribute(class: impl Into<String>, code: impl Into<String>) -> Error {
        ErrorKind::Unknown(UnknownError {
            class: class.into(),
            code: Some(code.into()),
            what: "attribute",
        })
        .into()
    }

    pub fn unknown_filter(class: impl Into<String>, code: impl Into<String>) -> Error {
        ErrorKind::Unknown(UnknownError {
            class: class.into(),
            code: Some(code.into()),
            what: "filter",
        })
        .into()
    }

    pub fn missing_argument(name: impl Into<String>) -> Error {
        ErrorKind::MissingArgument(MissingArgumentError {
            name: name.into(),
            query: None,
        })
        .into()
    }

    pub fn storage(sql: impl Into<String>, detail: impl Into<String>) -> Error {
        ErrorKind::Storage(StorageError {
            sql: sql.into(),
            detail: detail.into(),
        })
        .into()
    }

    pub fn integrity(detail: impl Into<String>) -> Error {
        ErrorKind::Integrity(IntegrityError {
            detail: detail.into(),
        })
        .into()
    }

    /// Attaches the canonical query text to a `MissingArgument` error.
    ///
    /// Other kinds are returned unchanged; the text would add nothing.
    pub fn with_query_text(self, canonical: &str) -> Error {
        let Some(inner) = &self.inner else {
            return self;
        };
        match &inner.kind {
            ErrorKind::MissingArgument(err) => ErrorKind::MissingArgument(MissingArgumentError {
                name: err.name.clone(),
                query: Some(canonical.to_string()),
            })
            .into(),
            _ => self,
        }
    }

    /// True if the error is a missing query argument.
    pub fn is_missing_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::MissingArgument(_))
    }

    /// True if the error was raised at registration time.
    pub fn is_definition(&self) -> bool {
        matches!(self.kind(), ErrorKind::Definition(_))
    }

    /// True if an unknown class/attribute/filter code was passed.
    pub fn is_unknown_code(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unknown(_))
    }

    /// Adds context to this error.
    ///
    /// Context is displayed first, followed by the root cause.
    pub fn context(self, consequent: Error) -> Error {
        let mut err = consequent;
        if err.inner.is_none() {
            err = Error::from(ErrorKind::Opaque);
        }
        let inner = err.inner.as_mut().unwrap();
        Arc::get_mut(inner).unwrap().cause = Some(self);
        err
    }

    fn chain(&self) -> impl Iterator<Item = &Error> {
        let mut err = self;
        core::iter::once(err).chain(core::iter::from_fn(move || {
            err = err.inner.as_ref().and_then(|inner| inner.cause.as_ref())?;
            Some(err)
        }))
    }

    fn kind(&self) -> &ErrorKind {
        self.inner
            .as_ref()
            .map(|inner| &inner.kind)
            .unwrap_or(&ErrorKind::Opaque)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.kind() {
            ErrorKind::Anyhow(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let mut it = self.chain().peekable();
        while let Some(err) = it.next() {
            core::fmt::Display::fmt(err.kind(), f)?;
            if it.peek().is_some() {
                f.write_str(": ")?;
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if !f.alternate() {
            core::fmt::Display::fmt(self, f)
        } else {
            let Some(ref inner) = self.inner else {
                return f.debug_struct("Error").field("kind", &"None").finish();
            };
            f.debug_struct("Error")
                .field("kind", &inner.kind)
                .field("cause", &inner.cause)
                .finish()
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use self::ErrorKind::*;

        match self {
            Definition(err) => core::fmt::Display::fmt(err, f),
            Unknown(err) => core::fmt::Display::fmt(err, f),
            MissingArgument(err) => core::fmt::Display::fmt(err, f),
            Storage(err) => core::fmt::Display::fmt(err, f),
            Integrity(err) => core::fmt::Display::fmt(err, f),
            Adhoc(err) => core::fmt::Display::fmt(err, f),
            Anyhow(err) => core::fmt::Display::fmt(err, f),
            Opaque => f.write_str("unknown strata error"),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Some(Arc::new(ErrorInner { kind, cause: None })),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error::from(ErrorKind::Anyhow(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size() {
        let expected_size = core::mem::size_of::<usize>();
        assert_eq!(expected_size, core::mem::size_of::<Error>());
    }

    #[test]
    fn missing_argument_carries_query_text() {
        let err = Error::missing_argument("contact_id")
            .with_query_text("SELECT Person WHERE id = :contact_id");
        assert!(err.is_missing_argument());
        assert_eq!(
            err.to_string(),
            "missing query argument 'contact_id' in: SELECT Person WHERE id = :contact_id"
        );
    }

    #[test]
    fn definition_error_display() {
        let err = Error::definition("Ticket", "attribute 'id' is a reserved keyword");
        assert!(err.is_definition());
        assert_eq!(
            err.to_string(),
            "invalid definition of class 'Ticket': attribute 'id' is a reserved keyword"
        );
    }

    #[test]
    fn context_chain_display() {
        let root = Error::storage("SELECT 1", "connection lost");
        let chained = root.context(err!("loading object"));
        assert_eq!(
            chained.to_string(),
            "loading object: failed to execute `SELECT 1`: connection lost"
        );
    }
}
