//! Localization helpers on top of a geometric model

use crate::core::dtm::ElevationModel;
use crate::core::geomodel::GeoModel;
use crate::types::{check_lengths, GeoResult, GeoTransform, GroundPositions, Heights, InverseLocation};
use serde::{Deserialize, Serialize};

/// Raster geometry of a sensor image
///
/// Physical points use the pixel-centre convention: index (0, 0) maps to the
/// geotransform applied at (0.5, 0.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub nb_rows: usize,
    pub nb_columns: usize,
    pub transform: GeoTransform,
}

impl Image {
    pub fn new(nb_rows: usize, nb_columns: usize, transform: GeoTransform) -> Self {
        Self {
            nb_rows,
            nb_columns,
            transform,
        }
    }

    /// Image without georeferencing: physical points are pixel centres
    pub fn sensor(nb_rows: usize, nb_columns: usize) -> Self {
        Self::new(nb_rows, nb_columns, GeoTransform::identity())
    }

    pub fn pixel_size_row(&self) -> f64 {
        self.transform.pixel_height
    }

    pub fn pixel_size_col(&self) -> f64 {
        self.transform.pixel_width
    }

    /// (row, col) index to georeferenced (row, col)
    pub fn transform_index_to_physical_point(&self, row: f64, col: f64) -> (f64, f64) {
        let (x, y) = self.transform.apply(col + 0.5, row + 0.5);
        (y, x)
    }

    /// Georeferenced (row, col) to (row, col) index
    pub fn transform_physical_point_to_index(&self, row_geo: f64, col_geo: f64) -> GeoResult<(f64, f64)> {
        let (col, row) = self.transform.invert(col_geo, row_geo)?;
        Ok((row - 0.5, col - 0.5))
    }
}

/// Altitude information used to localize points on the ground
#[derive(Clone, Copy)]
pub enum Elevation<'a> {
    /// Same altitude for every point
    Constant(f64),
    /// One altitude per point
    PerPoint(&'a [f64]),
    /// Intersection with a terrain model
    Terrain(&'a dyn ElevationModel),
}

impl std::fmt::Debug for Elevation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Elevation::Constant(h) => write!(f, "Constant({})", h),
            Elevation::PerPoint(h) => write!(f, "PerPoint({} values)", h.len()),
            Elevation::Terrain(_) => write!(f, "Terrain"),
        }
    }
}

/// A geometric model bound to an elevation and an optional image geometry
pub struct Localization<'a> {
    model: &'a dyn GeoModel,
    elevation: Elevation<'a>,
    image: Option<&'a Image>,
    fill_nan: bool,
}

impl<'a> Localization<'a> {
    pub fn new(model: &'a dyn GeoModel, elevation: Elevation<'a>, image: Option<&'a Image>) -> Self {
        Self {
            model,
            elevation,
            image,
            fill_nan: true,
        }
    }

    pub fn with_fill_nan(mut self, fill_nan: bool) -> Self {
        self.fill_nan = fill_nan;
        self
    }

    pub fn model(&self) -> &dyn GeoModel {
        self.model
    }

    /// Direct localization of sensor positions
    ///
    /// With `using_geotransform`, `row`/`col` are georeferenced image
    /// coordinates and are first converted to indexes.
    pub fn direct(&self, row: &[f64], col: &[f64], using_geotransform: bool) -> GeoResult<GroundPositions> {
        check_lengths("col", col.len(), row.len())?;

        let (row, col) = match (self.image, using_geotransform) {
            (Some(image), true) => {
                let mut rows = Vec::with_capacity(row.len());
                let mut cols = Vec::with_capacity(col.len());
                for (&r, &c) in row.iter().zip(col.iter()) {
                    let (ri, ci) = image.transform_physical_point_to_index(r, c)?;
                    rows.push(ri);
                    cols.push(ci);
                }
                (rows, cols)
            }
            _ => (row.to_vec(), col.to_vec()),
        };

        match self.elevation {
            Elevation::Constant(h) => self.model.direct_loc_h(&row, &col, h, self.fill_nan),
            Elevation::PerPoint(h) => self.model.direct_loc_h_points(&row, &col, h, self.fill_nan),
            Elevation::Terrain(dtm) => self.model.direct_loc_dtm(&row, &col, dtm),
        }
    }

    /// Inverse localization of ground positions
    ///
    /// With `using_geotransform`, the sensor positions are returned as
    /// georeferenced image coordinates.
    pub fn inverse(
        &self,
        lon: &[f64],
        lat: &[f64],
        alt: Heights<'_>,
        using_geotransform: bool,
    ) -> GeoResult<InverseLocation> {
        let mut sensor = self.model.inverse_loc(lon, lat, alt)?;
        if let (Some(image), true) = (self.image, using_geotransform) {
            for (r, c) in sensor.row.iter_mut().zip(sensor.col.iter_mut()) {
                let (row_geo, col_geo) = image.transform_index_to_physical_point(*r, *c);
                *r = row_geo;
                *c = col_geo;
            }
        }
        Ok(sensor)
    }
}

/// Co-localization: sensor positions in image 2 of points of image 1
///
/// Points of image 1 are localized on the ground with `model1` and
/// `elevation`, then projected in image 2 with `model2`.
#[allow(clippy::too_many_arguments)]
pub fn coloc(
    model1: &dyn GeoModel,
    model2: &dyn GeoModel,
    row: &[f64],
    col: &[f64],
    elevation: Elevation<'_>,
    image1: Option<&Image>,
    image2: Option<&Image>,
    using_geotransform: bool,
) -> GeoResult<InverseLocation> {
    let loc1 = Localization::new(model1, elevation, image1);
    let loc2 = Localization::new(model2, elevation, image2);

    let ground = loc1.direct(row, col, using_geotransform)?;
    check_lengths("ground positions", ground.nrows(), row.len())?;

    let lon = ground.column(0).to_vec();
    let lat = ground.column(1).to_vec();
    let alt = ground.column(2).to_vec();
    loc2.inverse(&lon, &lat, Heights::PerPoint(&alt), using_geotransform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_physical_conversions() {
        let image = Image::new(100, 200, GeoTransform::from_gdal([1000.0, 2.0, 0.0, 5000.0, 0.0, -2.0]));
        let (row_geo, col_geo) = image.transform_index_to_physical_point(0.0, 0.0);
        assert_eq!((row_geo, col_geo), (4999.0, 1001.0));
        let (row, col) = image.transform_physical_point_to_index(4999.0, 1001.0).unwrap();
        assert!(row.abs() < 1e-12 && col.abs() < 1e-12);
        assert_eq!(image.pixel_size_row(), -2.0);
        assert_eq!(image.pixel_size_col(), 2.0);
    }

    #[test]
    fn test_sensor_image_is_pixel_centre() {
        let image = Image::sensor(10, 10);
        assert_eq!(image.transform_index_to_physical_point(3.0, 4.0), (3.5, 4.5));
    }
}
