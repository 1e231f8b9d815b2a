//! Catalog of ingested audio and the pure helpers around it.
//!
//! # Storage Layout
//!
//! ```text
//! ~/.tunevault/
//! ├── catalog.db        # SQLite, one row per identity key
//! └── tmp/
//!     └── job-XXXXXX/   # Per-job scratch, removed when the job ends
//! ```

pub mod catalog;
pub mod identity;
pub mod title;

pub use catalog::{mark_stale, Catalog, SqliteCatalog};
pub use identity::{identity, is_supported_source, normalize_url, IdentityKey};
pub use title::{infer_region, parse_title, TrackInfo};
