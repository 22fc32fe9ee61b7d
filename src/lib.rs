pub mod api;
pub mod config;
pub mod entities;
pub mod extractor;
pub mod feed;
pub mod fetcher;
pub mod normalizer;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod text;
