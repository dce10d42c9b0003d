pub mod api;
pub mod config;
pub mod error;
pub mod firestore;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
