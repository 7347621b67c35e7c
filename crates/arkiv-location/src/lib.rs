//! Composable virtual locations.
//!
//! A [`Location`] names a plain file or something inside one: an archive
//! member, a search result, an archive inside an archive. It is pure data.
//! Resolving a location to bytes on disk is the job of the extraction cache
//! in `arkiv-cache`.
//!
//! ```
//! use arkiv_location::{ARCHIVE_PROTOCOL, Location};
//!
//! let archive = Location::from_url("file:///data/photos.zip").unwrap();
//! let inside = archive.with_payload(ARCHIVE_PROTOCOL, "2024/a.jpg").unwrap();
//!
//! assert_eq!(inside.as_url(), "file:///data/photos.zip//archive:2024/a.jpg");
//! assert_eq!(inside.origin().unwrap(), archive);
//! assert_eq!(Location::from_url(&inside.as_url()).unwrap(), inside);
//! ```

pub use error::{LocationError, Result};
pub use location::{ARCHIVE_PROTOCOL, FILE_PROTOCOL, Location, Payload, QUERY_PROTOCOL};

mod error;
mod location;
mod normalize;
mod url;
