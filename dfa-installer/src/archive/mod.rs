//! Archive installation.
//!
//! - `extractor`: streaming tar.gz extraction with prefix stripping
//! - `binaries`: moving top-level binaries into place and fixing their modes

mod binaries;
mod extractor;

pub use binaries::{move_binaries, normalize_permissions, BINARY_MODE};
pub use extractor::{extract, strip_member_prefix, ExtractSummary};
