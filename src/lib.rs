//! Local project tracker: a SQLite-backed project store and the image
//! normalization pipeline that prepares banner and gallery images for it.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod imaging;
pub mod lifecycle;
pub mod models;
