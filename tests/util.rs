#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;

use cuisto_store::legacy::{LegacyStore, MemoryLegacyStore};
use cuisto_store::model::RecipeDetails;
use cuisto_store::{Binary, DraftRecipe, Storage, StorageConfig};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};

pub async fn memory_storage() -> Storage {
    storage_with(StorageConfig::in_memory(), Arc::new(MemoryLegacyStore::default())).await
}

pub async fn storage_with(config: StorageConfig, legacy: Arc<dyn LegacyStore>) -> Storage {
    Storage::init(config, legacy).await.expect("init storage")
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
    });
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .expect("encode png fixture");
    out
}

pub fn png_data_uri(width: u32, height: u32) -> String {
    Binary::new("image/png", png_bytes(width, height)).to_data_uri()
}

/// Well-formed data URI whose payload is not an image; transforms skip it
/// and keep the bytes as they are.
pub fn opaque_data_uri(len: usize) -> String {
    Binary::new("image/jpeg", vec![0xAB; len]).to_data_uri()
}

pub fn draft(title: &str) -> DraftRecipe {
    DraftRecipe {
        details: RecipeDetails {
            title: title.to_string(),
            ..RecipeDetails::default()
        },
        ..DraftRecipe::default()
    }
}

pub fn decode_uri(uri: &str) -> image::DynamicImage {
    let binary = cuisto_store::encode_to_binary(uri).expect("data uri");
    image::load_from_memory(&binary.bytes).expect("decodable image")
}
