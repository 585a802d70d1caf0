//! `denidin-lifecycle` — the background worker that ages sessions out of
//! short-term storage into durable long-term memory.

pub mod engine;

pub use engine::LifecycleWorker;
