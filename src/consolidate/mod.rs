//! Duplicate symbol resolution.

mod method;
mod resolver;
mod rng;

pub use method::{MergeMethod, DEFAULT_SEED};
pub use resolver::{find_duplicates, resolve_duplicates, DuplicateGroup, DuplicateReport};
