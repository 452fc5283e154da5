pub mod error;
pub mod event;
pub mod job;
pub mod settings;
pub mod types;
pub mod validation;

mod serde_tests;
