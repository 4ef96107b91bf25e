use image::{imageops::FilterType, DynamicImage, RgbaImage};

/// Cheap change-detection signature: downsample to a small grayscale grid
/// and FNV-1a hash the raw bytes (spec.md §4.4 step 2, `phash_grid`
/// default 32x32). Stable across runs, unlike Python's salted `hash()`.
pub fn perceptual_hash(image: &RgbaImage, grid_width: u32, grid_height: u32) -> u64 {
    let resized = DynamicImage::ImageRgba8(image.clone())
        .resize_exact(grid_width, grid_height, FilterType::Nearest)
        .to_luma8();
    fnv1a64(resized.as_raw())
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_hash_equal() {
        let a = RgbaImage::from_pixel(64, 64, image::Rgba([10, 10, 10, 255]));
        let b = RgbaImage::from_pixel(64, 64, image::Rgba([10, 10, 10, 255]));
        assert_eq!(perceptual_hash(&a, 32, 32), perceptual_hash(&b, 32, 32));
    }

    #[test]
    fn different_images_hash_differently() {
        let a = RgbaImage::from_pixel(64, 64, image::Rgba([10, 10, 10, 255]));
        let b = RgbaImage::from_pixel(64, 64, image::Rgba([200, 200, 200, 255]));
        assert_ne!(perceptual_hash(&a, 32, 32), perceptual_hash(&b, 32, 32));
    }
}
