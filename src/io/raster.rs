use crate::core::filters::resize_bilinear;
use crate::types::{ChangeError, ChangeResult, GeoTransform, Image};
use ndarray::{Array3, Axis};
use std::path::Path;

/// Bands kept from each input raster
pub const MAX_BANDS: usize = 3;

/// Georeferencing a raster file carried, before any fallback is applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterProfile {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: Option<GeoTransform>,
    pub crs: Option<String>,
}

/// Load the first three bands of a raster and scale them into `[0, 1]`
pub fn load_and_preprocess<P: AsRef<Path>>(path: P) -> ChangeResult<(Image, RasterProfile)> {
    let path = path.as_ref();
    log::info!("Loading raster: {}", path.display());

    let (raw, profile) = read_raster(path)?;
    let image = normalize_by_max(raw);

    log::debug!(
        "Raster {}x{} with {} bands, transform: {}, crs: {}",
        profile.width,
        profile.height,
        profile.band_count,
        profile.transform.is_some(),
        profile.crs.as_deref().unwrap_or("none")
    );
    Ok((image, profile))
}

#[cfg(feature = "gdal")]
fn read_raster(path: &Path) -> ChangeResult<(Image, RasterProfile)> {
    use gdal::Dataset;

    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    if band_count == 0 {
        return Err(ChangeError::InvalidFormat(format!(
            "{} contains no raster bands",
            path.display()
        )));
    }
    let bands = band_count.min(MAX_BANDS);

    let mut data = Vec::with_capacity(bands * width * height);
    for b in 1..=bands {
        let rasterband = dataset.rasterband(b as isize)?;
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
        data.extend(band_data.data);
    }
    let image = Array3::from_shape_vec((bands, height, width), data)
        .map_err(|e| ChangeError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    let transform = dataset.geo_transform().ok().map(GeoTransform::from_gdal);
    let crs = Some(dataset.projection()).filter(|p| !p.trim().is_empty());

    Ok((
        image,
        RasterProfile {
            width,
            height,
            band_count,
            transform,
            crs,
        },
    ))
}

#[cfg(not(feature = "gdal"))]
fn read_raster(path: &Path) -> ChangeResult<(Image, RasterProfile)> {
    let decoded = image::open(path)?;
    let band_count = usize::from(decoded.color().channel_count()).min(MAX_BANDS);
    let rgb = decoded.to_rgb32f();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    // Interleaved HWC -> band-first CHW
    let hwc = Array3::from_shape_vec((height, width, MAX_BANDS), rgb.into_raw())
        .map_err(|e| ChangeError::Processing(format!("Failed to reshape image data: {}", e)))?;
    let image = hwc.permuted_axes([2, 0, 1]).as_standard_layout().to_owned();

    Ok((
        image,
        RasterProfile {
            width,
            height,
            band_count,
            transform: None,
            crs: None,
        },
    ))
}

/// Divide by the image's own maximum; non-finite samples become zero
pub fn normalize_by_max(mut image: Image) -> Image {
    image.mapv_inplace(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let max = image.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        image.mapv_inplace(|v| v / max);
    }
    image
}

/// Resample `monitor` onto the reference grid when the shapes differ
pub fn coregister(reference: &Image, monitor: &Image) -> ChangeResult<Image> {
    let (ref_c, ref_h, ref_w) = reference.dim();
    let (mon_c, mon_h, mon_w) = monitor.dim();
    if ref_c != mon_c {
        return Err(ChangeError::ShapeMismatch {
            expected: reference.shape().to_vec(),
            actual: monitor.shape().to_vec(),
        });
    }
    if (ref_h, ref_w) == (mon_h, mon_w) {
        return Ok(monitor.clone());
    }

    log::info!(
        "Resampling monitor image {}x{} onto reference grid {}x{}",
        mon_w,
        mon_h,
        ref_w,
        ref_h
    );
    let mut aligned = Image::zeros((ref_c, ref_h, ref_w));
    for (mut out, band) in aligned.axis_iter_mut(Axis(0)).zip(monitor.axis_iter(Axis(0))) {
        out.assign(&resize_bilinear(&band.to_owned(), ref_h, ref_w));
    }
    Ok(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_by_max() {
        let image = Array3::from_shape_vec((1, 1, 4), vec![0.0, 50.0, 200.0, f32::NAN]).unwrap();
        let scaled = normalize_by_max(image);
        assert_eq!(scaled[[0, 0, 2]], 1.0);
        assert_eq!(scaled[[0, 0, 1]], 0.25);
        assert_eq!(scaled[[0, 0, 3]], 0.0);
    }

    #[test]
    fn test_normalize_all_zero_is_unchanged() {
        let scaled = normalize_by_max(Image::zeros((3, 2, 2)));
        assert!(scaled.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_coregister_same_shape_is_identity() {
        let reference = Image::from_elem((3, 4, 4), 0.3);
        let monitor = Image::from_elem((3, 4, 4), 0.7);
        assert_eq!(coregister(&reference, &monitor).unwrap(), monitor);
    }

    #[test]
    fn test_coregister_resamples_to_reference_grid() {
        let reference = Image::zeros((3, 8, 6));
        let monitor = Image::from_elem((3, 4, 3), 0.5);
        let aligned = coregister(&reference, &monitor).unwrap();
        assert_eq!(aligned.dim(), (3, 8, 6));
        assert!(aligned.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_coregister_rejects_band_mismatch() {
        let reference = Image::zeros((3, 4, 4));
        let monitor = Image::zeros((1, 4, 4));
        assert!(matches!(
            coregister(&reference, &monitor),
            Err(ChangeError::ShapeMismatch { .. })
        ));
    }

    #[cfg(not(feature = "gdal"))]
    #[test]
    fn test_load_png_without_georeferencing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.png");
        let mut rgb = image::RgbImage::new(5, 4);
        rgb.put_pixel(1, 2, image::Rgb([255, 0, 51]));
        rgb.put_pixel(0, 0, image::Rgb([0, 102, 0]));
        rgb.save(&path).unwrap();

        let (image, profile) = load_and_preprocess(&path).unwrap();
        assert_eq!(image.dim(), (3, 4, 5));
        assert_eq!(profile.band_count, 3);
        assert!(profile.crs.is_none() && profile.transform.is_none());
        assert!((image[[0, 2, 1]] - 1.0).abs() < 1e-6);
        assert!((image[[2, 2, 1]] - 0.2).abs() < 1e-6);
        assert!((image[[1, 0, 0]] - 0.4).abs() < 1e-6);
    }
}
