mod error;
mod index;
pub mod keys;

pub use error::Error;
pub use index::{PathResolver, ScriptVerifier, TxIndex};

pub type Result<T> = std::result::Result<T, Error>;
