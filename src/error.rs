use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    /// Resolving or refreshing indexes failed as a whole.
    #[display("indexing failed")]
    Index,
    #[display("unknown index: {_0}")]
    UnknownIndex(#[error(not(source))] String),
    #[display("could not read the package list of {_0}")]
    Keys(#[error(not(source))] String),
    #[display("package not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A preview key that doesn't name an index.
    #[display("ambiguous package key {_0:?}, expected \"<index>/ <name>\"")]
    AmbiguousKey(#[error(not(source))] String),
    #[display("could not write output")]
    Output,
}
