//! Генерация thumbnails для фотографий площадок.
//!
//! При загрузке изображения создаются миниатюры трёх размеров, каждая в
//! JPEG (quality 85) и WebP. Вся работа синхронная и CPU-bound - хендлер
//! вызывает `store_with_thumbnails` через `spawn_blocking`.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;
use tracing::info;

// Размеры thumbnails: small - карточки в списке, medium - детальная
// страница, large - галерея
pub const THUMBNAIL_SIZES: [(&str, u32, u32); 3] = [
    ("small", 300, 300),
    ("medium", 800, 600),
    ("large", 1200, 900),
];

pub const JPEG_QUALITY: u8 = 85;

const IMAGES_DIR: &str = "venue_images";
const THUMBNAILS_DIR: &str = "venue_images/thumbnails";

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Не удалось обработать изображение: {0}")]
    Image(#[from] image::ImageError),
    #[error("Ошибка записи файла: {0}")]
    Io(#[from] std::io::Error),
}

/// Пути (относительно media root) к сгенерированным миниатюрам.
#[derive(Debug, Clone)]
pub struct ThumbnailSet {
    pub small: String,
    pub medium: String,
    pub large: String,
    pub small_webp: String,
    pub medium_webp: String,
    pub large_webp: String,
}

/// Результат сохранения: оригинал + полный набор миниатюр.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub image: String,
    pub thumbnails: ThumbnailSet,
}

/// Сохраняет оригинал под уникальным именем и генерирует все миниатюры.
pub fn store_with_thumbnails(
    media_root: &Path,
    data: &[u8],
    original_name: &str,
) -> Result<StoredImage, ThumbnailError> {
    fs::create_dir_all(media_root.join(IMAGES_DIR))?;
    fs::create_dir_all(media_root.join(THUMBNAILS_DIR))?;

    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_ascii_lowercase();
    let stem = uuid::Uuid::new_v4().to_string();

    // Оригинал сохраняем как есть
    let image_rel = format!("{}/{}.{}", IMAGES_DIR, stem, ext);
    fs::write(media_root.join(&image_rel), data)?;

    let img = image::load_from_memory(data)?;

    let mut jpeg = Vec::with_capacity(THUMBNAIL_SIZES.len());
    let mut webp = Vec::with_capacity(THUMBNAIL_SIZES.len());
    for (label, width, height) in THUMBNAIL_SIZES {
        // thumbnail() сохраняет пропорции, вписывая в рамку
        let thumb = img.thumbnail(width, height);
        jpeg.push(write_jpeg(media_root, &stem, label, &thumb)?);
        webp.push(write_webp(media_root, &stem, label, &thumb)?);
    }

    info!("Generated thumbnails for image {}", image_rel);

    Ok(StoredImage {
        image: image_rel,
        thumbnails: ThumbnailSet {
            small: jpeg[0].clone(),
            medium: jpeg[1].clone(),
            large: jpeg[2].clone(),
            small_webp: webp[0].clone(),
            medium_webp: webp[1].clone(),
            large_webp: webp[2].clone(),
        },
    })
}

fn write_jpeg(
    media_root: &Path,
    stem: &str,
    label: &str,
    thumb: &DynamicImage,
) -> Result<String, ThumbnailError> {
    let rel = format!("{}/{}_{}.jpg", THUMBNAILS_DIR, stem, label);
    let mut writer = BufWriter::new(File::create(media_root.join(&rel))?);
    // JPEG не умеет альфа-канал
    thumb
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))?;
    Ok(rel)
}

fn write_webp(
    media_root: &Path,
    stem: &str,
    label: &str,
    thumb: &DynamicImage,
) -> Result<String, ThumbnailError> {
    let rel = format!("{}/{}_{}.webp", THUMBNAILS_DIR, stem, label);
    let mut writer = BufWriter::new(File::create(media_root.join(&rel))?);
    thumb
        .to_rgba8()
        .write_with_encoder(WebPEncoder::new_lossless(&mut writer))?;
    Ok(rel)
}

/// Удаляет оригинал и все миниатюры записи. Отсутствующие файлы не ошибка.
pub fn remove_image_files(media_root: &Path, paths: &[Option<String>]) {
    for rel in paths.iter().flatten() {
        let _ = fs::remove_file(media_root.join(rel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn sample_png() -> Vec<u8> {
        // 640x480, одноцветная картинка
        let img = image::RgbImage::from_pixel(640, 480, image::Rgb([120u8, 40, 200]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn generates_all_six_thumbnails() {
        let dir = std::env::temp_dir().join(format!("rental-thumbs-{}", uuid::Uuid::new_v4()));
        let stored = store_with_thumbnails(&dir, &sample_png(), "photo.png").unwrap();

        for rel in [
            &stored.image,
            &stored.thumbnails.small,
            &stored.thumbnails.medium,
            &stored.thumbnails.large,
            &stored.thumbnails.small_webp,
            &stored.thumbnails.medium_webp,
            &stored.thumbnails.large_webp,
        ] {
            assert!(dir.join(rel).exists(), "missing {}", rel);
        }

        // small вписана в рамку 300x300 с сохранением пропорций
        let small = image::open(dir.join(&stored.thumbnails.small)).unwrap();
        let (w, h) = small.dimensions();
        assert!(w <= 300 && h <= 300);
        assert_eq!(w, 300); // 640x480 -> 300x225

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn remove_is_silent_for_missing_files() {
        let dir = std::env::temp_dir().join(format!("rental-thumbs-{}", uuid::Uuid::new_v4()));
        remove_image_files(&dir, &[Some("venue_images/nope.jpg".to_string()), None]);
    }
}
