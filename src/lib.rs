#[macro_use]
extern crate log;

pub use locktree::{DictionaryId, KeyComparator, LockTree, LockTreeHandler, RawUserKey};
pub use manager::LockTreeManager;
pub use workset::Workset;

pub mod error;
pub mod locktree;
pub mod manager;
pub mod workset;

pub type Result<T> = std::result::Result<T, error::LockLiteError>;
