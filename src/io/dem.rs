use crate::core::dtm::Dtm;
use crate::core::localization::Image;
use crate::types::{GeoError, GeoResult, GeoTransform};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Raster reader for terrain models and image geometries
pub struct DtmReader;

impl DtmReader {
    /// Read band 1 of a terrain raster
    pub fn read_dtm<P: AsRef<Path>>(dtm_path: P) -> GeoResult<Dtm> {
        log::info!("Reading DTM from: {}", dtm_path.as_ref().display());

        let dataset = Dataset::open(dtm_path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();

        log::debug!("DTM size: {}x{}", width, height);
        log::debug!("DTM geotransform: {:?}", geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let nodata_value = rasterband.no_data_value().unwrap_or(-32768.0) as f32;
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| GeoError::Dtm(format!("Failed to reshape DTM data: {}", e)))?;

        Dtm::new(data, GeoTransform::from_gdal(geo_transform), nodata_value)
    }

    /// Size and geotransform of a raster, without reading its pixels
    pub fn read_image<P: AsRef<Path>>(image_path: P) -> GeoResult<Image> {
        let dataset = Dataset::open(image_path.as_ref())?;
        let (width, height) = dataset.raster_size();
        // rasters without georeferencing fall back to pixel coordinates
        let transform = match dataset.geo_transform() {
            Ok(gt) => GeoTransform::from_gdal(gt),
            Err(e) => {
                log::debug!("{}: no geotransform ({}), using identity", image_path.as_ref().display(), e);
                GeoTransform::identity()
            }
        };
        Ok(Image::new(height, width, transform))
    }
}
