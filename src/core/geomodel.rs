//! Geometric model interface shared by every sensor model

use crate::core::dtm::ElevationModel;
use crate::types::{check_lengths, GeoResult, GroundPositions, Heights, InverseLocation};
use ndarray::Array2;

/// Capability set of a geolocation model
///
/// `direct_loc_*` map sensor positions (row, col) to ground positions,
/// returned as one `[lon, lat, alt]` row per input point. `inverse_loc` maps
/// ground positions back to the sensor.
pub trait GeoModel: Send + Sync {
    /// Short identifier of the model kind ("rpc", "template", ...)
    fn model_type(&self) -> &str;

    /// Direct localization at a constant altitude
    ///
    /// With `fill_nan`, unresolved points get NaN longitude and latitude.
    /// Without it, each model applies its own fill convention. Unresolved
    /// points are never dropped.
    fn direct_loc_h(
        &self,
        row: &[f64],
        col: &[f64],
        alt: f64,
        fill_nan: bool,
    ) -> GeoResult<GroundPositions>;

    /// Direct localization with one altitude per point
    fn direct_loc_h_points(
        &self,
        row: &[f64],
        col: &[f64],
        alt: &[f64],
        fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        check_lengths("col", col.len(), row.len())?;
        check_lengths("alt", alt.len(), row.len())?;

        let mut rows = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            let point = self.direct_loc_h(&row[i..=i], &col[i..=i], alt[i], fill_nan)?;
            for ground in point.outer_iter() {
                rows.push([ground[0], ground[1], ground[2]]);
            }
        }
        Ok(Array2::from(rows))
    }

    /// Direct localization on a terrain model
    fn direct_loc_dtm(
        &self,
        row: &[f64],
        col: &[f64],
        dtm: &dyn ElevationModel,
    ) -> GeoResult<GroundPositions>;

    /// Inverse localization, returns the sensor row, col and the altitude used
    fn inverse_loc(&self, lon: &[f64], lat: &[f64], alt: Heights<'_>) -> GeoResult<InverseLocation>;
}

/// Placeholder model: every operation logs and returns an empty result
#[derive(Debug)]
pub struct GeoModelTemplate {
    type_name: String,
}

impl GeoModelTemplate {
    pub fn new() -> Self {
        log::debug!("GeoModelTemplate: constructor");
        Self {
            type_name: "template".to_string(),
        }
    }
}

impl Default for GeoModelTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GeoModelTemplate {
    fn drop(&mut self) {
        log::debug!("GeoModelTemplate: destructor");
    }
}

impl GeoModel for GeoModelTemplate {
    fn model_type(&self) -> &str {
        &self.type_name
    }

    fn direct_loc_h(
        &self,
        _row: &[f64],
        _col: &[f64],
        _alt: f64,
        _fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        log::debug!("GeoModelTemplate: direct_loc_h");
        Ok(Array2::zeros((0, 3)))
    }

    fn direct_loc_dtm(
        &self,
        _row: &[f64],
        _col: &[f64],
        _dtm: &dyn ElevationModel,
    ) -> GeoResult<GroundPositions> {
        log::debug!("GeoModelTemplate: direct_loc_dtm");
        Ok(Array2::zeros((0, 3)))
    }

    fn inverse_loc(
        &self,
        _lon: &[f64],
        _lat: &[f64],
        _alt: Heights<'_>,
    ) -> GeoResult<InverseLocation> {
        log::debug!("GeoModelTemplate: inverse_loc");
        Ok(InverseLocation::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dtm::Dtm;
    use crate::types::GeoTransform;

    #[test]
    fn test_template_returns_empty_results() {
        let template = GeoModelTemplate::new();
        assert_eq!(template.model_type(), "template");

        let ground = template
            .direct_loc_h(&[10.0, 20.0], &[5.0, 15.0], 100.0, true)
            .unwrap();
        assert_eq!(ground.dim(), (0, 3));

        let dtm = Dtm::new(Array2::zeros((2, 2)), GeoTransform::identity(), -32768.0).unwrap();
        let ground = template
            .direct_loc_dtm(&[10.0, 20.0], &[5.0, 15.0], &dtm)
            .unwrap();
        assert_eq!(ground.nrows(), 0);

        let sensor = template
            .inverse_loc(&[7.0, 7.1], &[43.0, 43.1], Heights::Constant(0.0))
            .unwrap();
        assert!(sensor.is_empty());
        assert!(sensor.col.is_empty() && sensor.alt.is_empty());
    }

    #[test]
    fn test_template_usable_as_trait_object() {
        let models: Vec<Box<dyn GeoModel>> = vec![Box::new(GeoModelTemplate::default())];
        for model in &models {
            let ground = model.direct_loc_h_points(&[1.0], &[2.0], &[3.0], false).unwrap();
            assert_eq!(ground.nrows(), 0);
        }
        drop(models);
    }

    #[test]
    fn test_per_point_default_checks_lengths() {
        let template = GeoModelTemplate::new();
        assert!(template
            .direct_loc_h_points(&[1.0, 2.0], &[2.0], &[3.0, 4.0], true)
            .is_err());
    }
}
