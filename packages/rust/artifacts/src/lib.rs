//! Booklet rendering and persistence for errscribe.
//!
//! - [`render_markdown`] — the composed text document written to disk
//! - [`ArtifactStore`] / [`FsBookletStore`] — the two-method persistence
//!   contract (save, list) consumed by the pipeline coordinators

mod render;
mod store;

pub use render::{render_markdown, suggested_file_name};
pub use store::{ArtifactStore, FsBookletStore, StoreError};
