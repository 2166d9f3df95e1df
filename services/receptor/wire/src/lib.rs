//! Multipart evidence stream encoding, hashing, and header-driven reading for receptor.
//!
//! An evidence bundle travels as a single multipart stream. Each part carries
//! a header block that declares its exact size and a SHA-256 digest, which
//! lets a reader step over bodies without scanning them for the boundary.
//!
//! ## Wire Format
//!
//! ```text
//! +-------------------------------+------------------------------------+
//! | --<boundary>\r\n              | opening delimiter                  |
//! +-------------------------------+------------------------------------+
//! | Content-Disposition: ...\r\n  | structured|file; name=..;filename= |
//! | Content-Type: ...\r\n         | payload media type                 |
//! | Content-Size: N\r\n           | exact body length                  |
//! | Content-Hash: ...\r\n         | URL-safe base64 SHA-256            |
//! | <metadata>: ...\r\n           | optional caller headers            |
//! | \r\n                          | end of header block                |
//! +-------------------------------+------------------------------------+
//! | body (N bytes)                | opaque, may contain anything       |
//! +-------------------------------+------------------------------------+
//! | \r\n--<boundary>\r\n          | next part ...                      |
//! +-------------------------------+------------------------------------+
//! | \r\n--<boundary>--\r\n        | closing delimiter                  |
//! +-------------------------------+------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod content_type;
pub mod error;
pub mod hash;
pub mod header;
pub mod reader;

// Re-export main types
pub use builder::{generate_boundary, MultipartBuilder, StructuredMessage, StructuredValue, MAX_BOUNDARY_LEN};
pub use content_type::{StreamContentType, ARCHIVE_MEDIA_TYPE, BUNDLE_MEDIA_TYPE};
pub use error::{ErrorKind, WireError};
pub use hash::{
    compute_hash, digest_through, effective_buffer_size, ContentHash, HashingReader, StreamHasher,
    DEFAULT_BUFFER_SIZE,
};
pub use header::{
    Disposition, DispositionType, PartHeader, PartKind, CONTENT_DISPOSITION, CONTENT_HASH,
    CONTENT_LENGTH, CONTENT_SIZE, CONTENT_TYPE, STRUCTURED_CONTENT_TYPE,
};
pub use reader::{MultipartReader, Part, PartMetadata, ReaderOptions, MAX_HEADER_LINE, MAX_HEADER_LINES};
