//! Artifact acquisition.
//!
//! - `http`: `reqwest` transport with connect/read and overall deadlines
//! - `checksum`: SHA-256 verification
//! - `progress`: fetch events and throttling
//! - `fetcher`: ordered multi-source fallback
//!
//! ```text
//! ArtifactFetcher
//!         │
//!         ├── offline copy (optional, verified)
//!         │
//!         ├── Transport (trait)
//!         │       └── HttpTransport ── TrustStore
//!         │
//!         └── verify_checksum
//! ```

mod checksum;
mod fetcher;
mod http;
mod progress;

pub use checksum::{calculate_file_checksum, verify_checksum};
pub use fetcher::ArtifactFetcher;
pub use http::{BodyTimeout, Download, HttpTransport, Transport, TrustStore};
pub use progress::{FetchEvent, FetchObserver, ProgressThrottle, PROGRESS_INTERVAL};
