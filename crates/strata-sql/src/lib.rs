mod cache;
pub use cache::{Accelerator, QueryCache};

mod compiler;
pub use compiler::{Compiler, ExtendedJoinSpec, OrderSpec, SelectOptions};

pub mod hierarchy;
pub use hierarchy::{HierarchyStore, SqlHierarchyStore};

mod integrity;
pub use integrity::{IntegrityChecker, IntegrityIssue, IntegrityReport, ProposedFix};

mod query;
pub use query::{Join, JoinKind, JoinOn, SqlQuery};

mod serializer;
pub use serializer::{Args, Renderer};
