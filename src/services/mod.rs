pub mod cancel;
pub mod lookup_cache;
pub mod operation_log;
pub mod orchestrator;
pub mod store;
pub mod sync_engine;
pub mod track_matcher;
