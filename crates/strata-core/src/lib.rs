mod error;
pub use error::Error;

pub mod driver;
pub use driver::Connection;

pub mod expr;
pub use expr::Expr;

pub mod registry;
pub use registry::Registry;

pub mod search;
pub use search::Search;

mod value;
pub use value::Value;

/// A Result type alias that uses strata's [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
