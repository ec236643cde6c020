use thiserror::Error;

/// Errors raised while reading a MOBI container.
#[derive(Error, Debug)]
pub enum MobiError {
    #[error("Not a MOBI container: expected BOOKMOBI at offset 60")]
    InvalidMagic,

    #[error("Truncated container: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("Malformed {section} header: {reason}")]
    MalformedHeader {
        section: &'static str,
        reason: String,
    },

    #[error("Unsupported compression type {0}")]
    BadCompression(u16),

    #[error("Encrypted records are not supported (encryption type {0})")]
    Encrypted(u16),

    #[error("Malformed EXTH block: {0}")]
    MalformedExth(String),

    #[error("Malformed {kind} index: {reason}")]
    MalformedIndex { kind: &'static str, reason: String },

    #[error("Corrupt compressed text in record {record}: {reason}")]
    CorruptText { record: usize, reason: String },

    #[error("Record {0} does not exist")]
    MissingRecord(usize),
}

impl MobiError {
    pub(crate) fn header(section: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            section,
            reason: reason.into(),
        }
    }

    pub(crate) fn index(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedIndex {
            kind,
            reason: reason.into(),
        }
    }
}
