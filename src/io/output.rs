use crate::core::vectorize::FeatureCollection;
use crate::types::{ChangeError, ChangeResult, Image};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// File name of the vectorized change polygons
pub const GEOJSON_FILENAME: &str = "change_detection.geojson";
/// File name of the rendered heatmap
pub const CHANGE_MAP_FILENAME: &str = "change_map.png";

/// Quantize a `[0, 1]` band-first image to 8-bit RGB.
///
/// Images with fewer than three bands repeat their last band.
pub fn image_to_rgb(image: &Image) -> ChangeResult<RgbImage> {
    let (channels, height, width) = image.dim();
    if channels == 0 {
        return Err(ChangeError::InvalidFormat(
            "Cannot quantize an image without channels".to_string(),
        ));
    }
    Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (i, j) = (y as usize, x as usize);
        let px = |k: usize| (image[[k.min(channels - 1), i, j]].clamp(0.0, 1.0) * 255.0) as u8;
        image::Rgb([px(0), px(1), px(2)])
    }))
}

/// PNG-encode an RGB raster into memory
pub fn encode_png(rgb: &RgbImage) -> ChangeResult<Vec<u8>> {
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Writes analysis artifacts into one output directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    output_dir: PathBuf,
}

impl OutputWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> ChangeResult<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write_geojson(&self, collection: &FeatureCollection) -> ChangeResult<PathBuf> {
        let path = self.output_dir.join(GEOJSON_FILENAME);
        let body = serde_json::to_string(collection)?;
        std::fs::write(&path, body)?;
        log::info!(
            "Wrote {} change polygons to {}",
            collection.features.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn write_change_map(&self, heatmap: &RgbImage) -> ChangeResult<PathBuf> {
        let path = self.output_dir.join(CHANGE_MAP_FILENAME);
        heatmap.save_with_format(&path, ImageFormat::Png)?;
        log::info!("Wrote change map to {}", path.display());
        Ok(path)
    }
}
