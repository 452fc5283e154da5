pub mod ansi;
pub mod api;
pub mod metrics;
