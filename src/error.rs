//! Error taxonomy shared by the mapping and renaming layers.
//!
//! Only [`Error::ClassParse`] is recoverable during extraction: it is caught
//! at the file boundary, logged, and the file is skipped. Every other variant
//! propagates to the caller of a mapping job or a rename.

use thiserror::Error;

use crate::classfile::ClassParseError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An identity string is missing its owner/member separators.
    #[error("malformed identity: {0}")]
    MalformedIdentity(String),

    /// Neither the identity cache nor the store knows this identity.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("symbol {identity} cannot be renamed: {reason}")]
    InvalidRenameTarget { identity: String, reason: String },

    /// Renaming a class may not move it to another package.
    #[error("cannot move {from} to {to}: classes may only be renamed within their package")]
    CrossPackageRename { from: String, to: String },

    #[error("class parse error: {0}")]
    ClassParse(#[from] ClassParseError),

    /// Rewritten bytecode did not parse back; the previous content stands.
    #[error("rewritten class {file} failed validation: {source}")]
    RewriteValidation {
        file: String,
        #[source]
        source: ClassParseError,
    },

    #[error("no file with id {0} in workspace")]
    UnknownFile(i64),

    /// The event broker's consumer has stopped and can take no more events.
    #[error("mapping event broker is closed")]
    BrokerClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("error walking directory: {0}")]
    Walk(#[from] ignore::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_rename(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRenameTarget {
            identity: identity.into(),
            reason: reason.into(),
        }
    }
}
