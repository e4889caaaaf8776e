//! Courier real-time messaging core library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod cache;
pub mod config;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod ws;
