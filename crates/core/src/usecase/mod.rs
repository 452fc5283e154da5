pub mod app_service;
pub mod connection;
pub mod hub;
pub mod io;
pub mod registry;
pub mod scoreboard;
pub mod store;
