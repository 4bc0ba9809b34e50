pub mod backfill_service;
pub mod batch_service;
pub mod chunker;
pub mod embedding;
pub mod import_service;
pub mod narrative_service;
pub mod project_resolver;
pub mod reflection_service;
pub mod state_store;
pub mod watcher_service;
