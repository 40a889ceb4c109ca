use thiserror::Error;

use crate::ObjectId;
use crate::encryption::EncryptionError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: a broken source file, an invalid ICC profile, an unknown filter.
    Format,
    /// The caller used the API incorrectly.
    Usage,
    /// A password is wrong or the document was opened without the rights the operation needs.
    Security,
    /// Reading from or writing to the underlying source or target failed.
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    /// An Object has the wrong type, e.g. the Object is an Array where a Name would be expected.
    #[error("object has wrong type; expected type {expected} but found type {found}")]
    ObjectType {
        expected: &'static str,
        found: &'static str,
    },
    /// Dictionary key was not found.
    #[error("missing required dictionary key \"{0}\"")]
    DictKey(String),
    /// The stream couldn't be decompressed.
    #[error("couldn't decompress stream: {0}")]
    Decompress(#[from] DecompressError),
    /// The stream names a filter that cannot be decoded.
    #[error("unsupported stream filter /{0}")]
    UnsupportedFilter(String),
    /// Failed to parse input.
    #[error("couldn't parse input: {0}")]
    Parse(#[from] ParseError),
    /// Error while parsing cross reference table.
    #[error("invalid cross-reference table: {0}")]
    Xref(#[from] XrefError),
    /// Invalid stream.
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    /// An embedded ICC profile failed validation.
    #[error("invalid ICC profile: {0}")]
    InvalidIccProfile(String),
    /// Found Object ID does not match Expected Object ID.
    #[error("object ID mismatch")]
    ObjectIdMismatch,
    /// The Object ID was not found.
    #[error("object ID {} {} was not found", .0.0, .0.1)]
    ObjectNotFound(ObjectId),
    /// No xref entry exists for the requested object.
    #[error("missing xref entry")]
    MissingXrefEntry,
    /// Offset in file is invalid.
    #[error("invalid file offset: {0}")]
    InvalidOffset(usize),
    /// Dereferencing object failed due to a reference cycle.
    #[error("reference cycle with object {} {}", .0.0, .0.1)]
    ReferenceCycle(ObjectId),
    /// Error when encrypting or decrypting the contents of the file.
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    /// Bad password or missing permissions.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),
    /// The API was used in a way that is not allowed in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] UsageError),
    /// Numeric conversion overflowed.
    #[error("numeric type cast failed: {0}")]
    NumericCast(String),
    /// Decoding byte vector to UTF8 String failed.
    #[error("invalid UTF-8")]
    UTF8,
    /// IO error
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidOperation(_) => ErrorKind::Usage,
            Error::Security(_) => ErrorKind::Security,
            Error::IO(_) => ErrorKind::Io,
            _ => ErrorKind::Format,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("decoding ASCII85 failed: {0}")]
    Ascii85(&'static str),
    #[error("decoding ASCIIHex failed: invalid digit {0:#04x}")]
    AsciiHex(u8),
    #[error("decoding LZW failed: {0}")]
    Lzw(String),
    #[error("decoding Flate failed: {0}")]
    Flate(String),
    #[error("invalid predictor: {0}")]
    Predictor(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("invalid file trailer")]
    InvalidTrailer,
    #[error("invalid cross reference table")]
    InvalidXref,
    #[error("invalid object at byte {offset}")]
    IndirectObject { offset: usize },
    #[error("invalid object stream")]
    InvalidObjectStream,
}

#[derive(Debug, Error)]
pub enum XrefError {
    /// Could not parse cross reference table.
    #[error("could not parse xref")]
    Parse,
    /// Could not find start of cross reference table.
    #[error("invalid start value")]
    Start,
    /// The trailer's "Prev" field was invalid.
    #[error("invalid start value in Prev field")]
    PrevStart,
    /// The trailer's "XRefStm" field was invalid.
    #[error("invalid stream start value")]
    StreamStart,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("the writer has already been closed")]
    WriterClosed,
    #[error("a stream is still open on this writer; finish it first")]
    StreamInProgress,
    #[error("compression and encryption settings are fixed once writing has begun")]
    SettingsLocked,
    #[error("object {} {} has already been written", .0.0, .0.1)]
    ObjectAlreadyWritten(ObjectId),
    #[error("document has no pages")]
    NoPages,
    #[error("page tree has {0} parents; a single parent is required")]
    MultipleParents(usize),
    #[error("the top parent can only be set before the first page is added")]
    PageTreeStarted,
    #[error("page order has {found} entries but the document has {expected} pages")]
    ReorderLengthMismatch { expected: usize, found: usize },
    #[error("page {page} in the new order is outside 1..={max}")]
    ReorderOutOfRange { page: u32, max: usize },
    #[error("page {0} appears twice in the new order")]
    ReorderDuplicate(u32),
    #[error("page number {0} was not found")]
    PageNumberNotFound(u32),
    #[error("the reader has already been consumed by a copy operation")]
    ReaderConsumed,
    #[error("the document has already been added")]
    DocumentAlreadyAdded,
    #[error("invalid encryption settings: {0}")]
    InvalidEncryptionConfig(&'static str),
    #[error("the resource handle does not belong to this document")]
    UnknownResource,
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("the supplied password is incorrect")]
    IncorrectPassword,
    #[error("the document must be opened with the owner password")]
    OwnerPasswordRequired,
    #[error("unsupported security handler /{}", String::from_utf8_lossy(.0))]
    UnsupportedSecurityHandler(Vec<u8>),
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Error::UTF8
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::UTF8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        assert_eq!(Error::from(UsageError::WriterClosed).kind(), ErrorKind::Usage);
        assert_eq!(Error::from(SecurityError::IncorrectPassword).kind(), ErrorKind::Security);
        assert_eq!(Error::from(ParseError::InvalidXref).kind(), ErrorKind::Format);
        assert_eq!(Error::UnsupportedFilter("JBIG2Decode".into()).kind(), ErrorKind::Format);
        let io = std::io::Error::other("disk full");
        assert_eq!(Error::from(io).kind(), ErrorKind::Io);
    }
}
