mod atomic;
mod catalog;
mod store;
mod track_cache;

pub use catalog::{CatalogEntry, DirectoryCatalog, TrackCatalog};
pub use store::{JsonPlaylistStore, MemoryPlaylistStore, PlaylistStore};
pub use track_cache::{CachedArtifact, TrackCache};
