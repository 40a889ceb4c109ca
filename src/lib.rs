#[macro_use]
mod object;
pub use object::{Dictionary, Object, ObjectId, Stream, StreamContent, StringFormat};

mod error;
pub use error::{DecompressError, Error, ErrorKind, ParseError, Result, SecurityError, UsageError, XrefError};

pub mod encryption;
pub use encryption::{EncryptionMethod, EncryptionState, Permissions, StandardSecurityHandler};

mod save_options;
pub use save_options::{EncryptionConfig, SaveOptions, SaveOptionsBuilder};

pub mod filters;
pub mod xref;
pub use xref::{Xref, XrefEntry};

mod writer;
pub use writer::{CountingWrite, Writer};

mod reference_table;
pub use reference_table::{IndirectReferenceTable, Location};

mod object_stream;
pub use object_stream::{ObjectStream, ObjectStreamBuilder};

mod parser;
mod reader;
pub use reader::{PdfReader, ReaderId};

mod pdf_writer;
pub use pdf_writer::{IndirectObjectSink, PdfWriter, StreamWriter, WriterState};

mod page_tree;
pub use page_tree::PageTree;

mod fingerprint;
pub use fingerprint::{DEFAULT_DEPTH_BUDGET, Fingerprinter};

mod import;
pub use import::{PageBoundary, PdfCopy};

mod resources;
pub use resources::{ResourceEmitter, ResourceHandle, ResourceKind, ResourceRegistry, StaticResource};

mod icc;
pub use icc::{IccColorSpace, IccProfile};

pub mod encodings;
pub use encodings::text_string;

#[cfg(feature = "chrono")]
mod datetime;

mod document;
pub use document::{DocumentInfo, PageContent, PdfDocument};
