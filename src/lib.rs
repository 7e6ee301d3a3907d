pub mod app;
pub mod assets;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod http;
pub mod output;
pub mod probe;
pub mod regions;
pub mod store;
pub mod token;
