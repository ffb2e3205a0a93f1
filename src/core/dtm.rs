//! Digital terrain model and line-of-sight intersection

use crate::core::geomodel::GeoModel;
use crate::types::{check_lengths, GeoError, GeoResult, GeoTransform, GroundPositions};
use ndarray::Array2;
use num_traits::Float;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Source of ground elevation as a function of horizontal position
pub trait ElevationModel: Send + Sync {
    /// Elevation at (lon, lat), `None` outside coverage or on no-data
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64>;

    /// (min, max) of the valid elevations
    fn elevation_range(&self) -> Option<(f64, f64)>;
}

/// Line-of-sight / terrain intersection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntersectionConfig {
    /// Margin added above and below the terrain range (meters)
    pub altitude_margin: f64,
    /// Number of altitude steps used to bracket the crossing
    pub los_samples: usize,
    /// Altitude tolerance of the bisection (meters)
    pub altitude_tolerance: f64,
    /// Maximum bisection iterations
    pub max_iterations: usize,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            altitude_margin: 10.0,
            los_samples: 64,
            altitude_tolerance: 1e-3,
            max_iterations: 60,
        }
    }
}

/// Gridded terrain model, GDAL geotransform, pixel-centre convention
#[derive(Debug, Clone)]
pub struct Dtm {
    data: Array2<f32>,
    transform: GeoTransform,
    nodata: f32,
    range: Option<(f64, f64)>,
}

impl Dtm {
    pub fn new(data: Array2<f32>, transform: GeoTransform, nodata: f32) -> GeoResult<Self> {
        if data.is_empty() {
            return Err(GeoError::Dtm("Terrain grid is empty".to_string()));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(GeoError::Dtm(format!(
                "Degenerate terrain geotransform: {:?}",
                transform
            )));
        }
        // the geotransform must be invertible for lookups
        transform.invert(0.0, 0.0).map_err(|e| GeoError::Dtm(e.to_string()))?;

        let range = data
            .iter()
            .filter(|&&v| v != nodata && v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, &v| {
                let v = v as f64;
                Some(match acc {
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    None => (v, v),
                })
            });

        log::debug!(
            "Terrain grid {}x{}, elevation range {:?}",
            data.nrows(),
            data.ncols(),
            range
        );

        Ok(Self {
            data,
            transform,
            nodata,
            range,
        })
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn nodata(&self) -> f32 {
        self.nodata
    }

    /// Fractional (col, row) index of a ground position
    pub fn index(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        let (col, row) = self.transform.invert(lon, lat).ok()?;
        Some((col - 0.5, row - 0.5))
    }
}

impl ElevationModel for Dtm {
    fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        let (x, y) = self.index(lon, lat)?;
        bilinear(&self.data, x, y, self.nodata).map(f64::from)
    }

    fn elevation_range(&self) -> Option<(f64, f64)> {
        self.range
    }
}

/// Bilinear interpolation at fractional (x = col, y = row)
///
/// Positions up to half a pixel outside the outer cell centres are clamped.
fn bilinear<T: Float>(grid: &Array2<T>, x: f64, y: f64, nodata: T) -> Option<T> {
    let (nrows, ncols) = grid.dim();
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    if x < -0.5 || y < -0.5 || x > ncols as f64 - 0.5 || y > nrows as f64 - 0.5 {
        return None;
    }
    let x = x.clamp(0.0, (ncols - 1) as f64);
    let y = y.clamp(0.0, (nrows - 1) as f64);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(ncols - 1);
    let y1 = (y0 + 1).min(nrows - 1);

    let dx = T::from(x - x0 as f64)?;
    let dy = T::from(y - y0 as f64)?;

    let v00 = grid[[y0, x0]];
    let v01 = grid[[y0, x1]];
    let v10 = grid[[y1, x0]];
    let v11 = grid[[y1, x1]];

    if [v00, v01, v10, v11].iter().any(|&v| v == nodata || v.is_nan()) {
        return None;
    }

    let one = T::one();
    Some(
        v00 * (one - dx) * (one - dy)
            + v01 * dx * (one - dy)
            + v10 * (one - dx) * dy
            + v11 * dx * dy,
    )
}

/// Intersect each sensor line of sight with the terrain
///
/// Points whose line of sight never crosses the terrain get a NaN triple.
pub fn intersect_line_of_sight(
    model: &dyn GeoModel,
    row: &[f64],
    col: &[f64],
    dtm: &dyn ElevationModel,
    config: &IntersectionConfig,
) -> GeoResult<GroundPositions> {
    intersect_with_locator(row, col, dtm, config, |r, c, h| {
        let ground = model.direct_loc_h(&[r], &[c], h, true)?;
        if ground.nrows() == 0 {
            return Ok(None);
        }
        let (lon, lat) = (ground[[0, 0]], ground[[0, 1]]);
        Ok((lon.is_finite() && lat.is_finite()).then_some((lon, lat)))
    })
}

/// Line of sight intersection driven by `locate(row, col, h) -> (lon, lat)`
///
/// `locate` is called for every sample and bisection step, so it must not log
/// per call.
pub(crate) fn intersect_with_locator<F>(
    row: &[f64],
    col: &[f64],
    dtm: &dyn ElevationModel,
    config: &IntersectionConfig,
    locate: F,
) -> GeoResult<GroundPositions>
where
    F: Fn(f64, f64, f64) -> GeoResult<Option<(f64, f64)>> + Sync,
{
    check_lengths("col", col.len(), row.len())?;
    if config.los_samples == 0 {
        return Err(GeoError::InvalidInput(
            "Line of sight needs at least one sample".to_string(),
        ));
    }

    let (h_min, h_max) = dtm
        .elevation_range()
        .ok_or_else(|| GeoError::Dtm("Terrain model has no valid elevation".to_string()))?;
    let top = h_max + config.altitude_margin;
    let bottom = h_min - config.altitude_margin;

    let points: Vec<[f64; 3]> = row
        .par_iter()
        .zip(col.par_iter())
        .map(|(&r, &c)| intersect_point(&locate, r, c, dtm, top, bottom, config))
        .collect::<GeoResult<_>>()?;

    let unresolved = points.iter().filter(|p| p[2].is_nan()).count();
    if unresolved > 0 {
        log::debug!("{} of {} lines of sight miss the terrain", unresolved, points.len());
    }

    Ok(Array2::from(points))
}

fn intersect_point<F>(
    locate: &F,
    row: f64,
    col: f64,
    dtm: &dyn ElevationModel,
    top: f64,
    bottom: f64,
    config: &IntersectionConfig,
) -> GeoResult<[f64; 3]>
where
    F: Fn(f64, f64, f64) -> GeoResult<Option<(f64, f64)>>,
{
    const MISS: [f64; 3] = [f64::NAN, f64::NAN, f64::NAN];

    if !row.is_finite() || !col.is_finite() {
        return Ok(MISS);
    }

    // height above terrain of the line of sight at altitude h
    let gap = |h: f64| -> GeoResult<Option<(f64, f64, f64)>> {
        Ok(locate(row, col, h)?
            .and_then(|(lon, lat)| dtm.elevation(lon, lat).map(|terrain| (h - terrain, lon, lat))))
    };

    let step = (top - bottom) / config.los_samples as f64;
    let mut previous: Option<(f64, f64)> = None;

    for k in 0..=config.los_samples {
        let h = top - step * k as f64;
        let current = gap(h)?;

        if let Some((g, lon, lat)) = current {
            if g == 0.0 {
                return Ok([lon, lat, h]);
            }
            if let Some((h_above, g_above)) = previous {
                if g_above > 0.0 && g < 0.0 {
                    return refine(&gap, h_above, h, config);
                }
            }
        }
        previous = current.map(|(g, _, _)| (h, g));
    }

    Ok(MISS)
}

/// Bisection between an altitude above the terrain and one below it
fn refine<F>(gap: &F, mut above: f64, mut below: f64, config: &IntersectionConfig) -> GeoResult<[f64; 3]>
where
    F: Fn(f64) -> GeoResult<Option<(f64, f64, f64)>>,
{
    for _ in 0..config.max_iterations {
        if (above - below).abs() <= config.altitude_tolerance {
            break;
        }
        let mid = 0.5 * (above + below);
        match gap(mid)? {
            Some((g, _, _)) if g > 0.0 => above = mid,
            Some(_) => below = mid,
            None => break,
        }
    }

    let h = 0.5 * (above + below);
    match gap(h)? {
        Some((_, lon, lat)) => Ok([lon, lat, h]),
        None => Ok([f64::NAN, f64::NAN, f64::NAN]),
    }
}
