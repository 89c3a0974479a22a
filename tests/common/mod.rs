#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use project_tracker::config::Config;
use project_tracker::db::{self, Database};
use tempfile::TempDir;

/// A fresh store in its own temporary directory. Keep the `TempDir` alive for
/// as long as the store is used.
pub async fn open_store() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = db::init(&config_in(&dir)).await.unwrap();
    (db, dir)
}

pub fn config_in(dir: &TempDir) -> Config {
    let path = dir.path().join("projects.db");
    Config::with_database_url(format!("sqlite://{}", path.display()))
}

/// PNG-encoded test image with a little texture so JPEG has work to do
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 5 + y * 3) % 256) as u8])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
