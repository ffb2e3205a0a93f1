//! Rational polynomial coefficient (RPC) sensor model
//!
//! Each function is a ratio of two 20-term cubic polynomials evaluated in
//! normalised coordinates `(v - offset) / scale`. The direct functions give
//! (lon, lat) from (col, row, alt), the inverse ones (col, row) from
//! (lon, lat, alt). A model may carry either set or both; without direct
//! functions the direct localization is solved iteratively from the inverse.

use crate::core::dtm::{intersect_with_locator, ElevationModel, IntersectionConfig};
use crate::core::geomodel::GeoModel;
use crate::types::{
    check_lengths, GeoError, GeoResult, GroundPositions, Heights, InverseLocation,
};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of terms of an RPC polynomial
pub const NB_COEFFS: usize = 20;

/// Exponents of (X, Y, Z) for each monomial, in coefficient order
const MONOMIAL_EXPONENTS: [[i32; 3]; NB_COEFFS] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 1, 0],
    [1, 0, 1],
    [0, 1, 1],
    [2, 0, 0],
    [0, 2, 0],
    [0, 0, 2],
    [1, 1, 1],
    [3, 0, 0],
    [1, 2, 0],
    [1, 0, 2],
    [2, 1, 0],
    [0, 3, 0],
    [0, 1, 2],
    [2, 0, 1],
    [0, 2, 1],
    [0, 0, 3],
];

type Monomials = [f64; NB_COEFFS];

fn monomials(x: f64, y: f64, z: f64) -> Monomials {
    let mut m = [0.0; NB_COEFFS];
    for (value, [ex, ey, ez]) in m.iter_mut().zip(MONOMIAL_EXPONENTS.iter()) {
        *value = x.powi(*ex) * y.powi(*ey) * z.powi(*ez);
    }
    m
}

/// Partial derivatives of every monomial along X and Y
fn monomial_derivatives(x: f64, y: f64, z: f64) -> (Monomials, Monomials) {
    let mut dx = [0.0; NB_COEFFS];
    let mut dy = [0.0; NB_COEFFS];
    for (i, &[ex, ey, ez]) in MONOMIAL_EXPONENTS.iter().enumerate() {
        if ex > 0 {
            dx[i] = ex as f64 * x.powi(ex - 1) * y.powi(ey) * z.powi(ez);
        }
        if ey > 0 {
            dy[i] = ey as f64 * x.powi(ex) * y.powi(ey - 1) * z.powi(ez);
        }
    }
    (dx, dy)
}

fn dot(coeffs: &[f64; NB_COEFFS], m: &Monomials) -> f64 {
    coeffs.iter().zip(m.iter()).map(|(c, v)| c * v).sum()
}

/// Affine normalisation of one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub offset: f64,
    pub scale: f64,
}

impl Normalization {
    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    pub fn normalize(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Ratio of two RPC polynomials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationalFunction {
    pub numerator: [f64; NB_COEFFS],
    pub denominator: [f64; NB_COEFFS],
}

impl RationalFunction {
    pub fn new(numerator: [f64; NB_COEFFS], denominator: [f64; NB_COEFFS]) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Build from separate numerator and denominator lists
    pub fn from_slices(numerator: &[f64], denominator: &[f64]) -> GeoResult<Self> {
        let to_array = |coeffs: &[f64], what: &str| -> GeoResult<[f64; NB_COEFFS]> {
            coeffs.try_into().map_err(|_| {
                GeoError::InvalidFormat(format!(
                    "RPC {} has {} coefficients, expected {}",
                    what,
                    coeffs.len(),
                    NB_COEFFS
                ))
            })
        };
        Ok(Self::new(
            to_array(numerator, "numerator")?,
            to_array(denominator, "denominator")?,
        ))
    }

    /// Build from 40 values: numerator then denominator
    pub fn from_coefficients(coeffs: &[f64]) -> GeoResult<Self> {
        if coeffs.len() != 2 * NB_COEFFS {
            return Err(GeoError::InvalidFormat(format!(
                "RPC function has {} coefficients, expected {}",
                coeffs.len(),
                2 * NB_COEFFS
            )));
        }
        Self::from_slices(&coeffs[..NB_COEFFS], &coeffs[NB_COEFFS..])
    }

    fn evaluate(&self, m: &Monomials) -> f64 {
        dot(&self.numerator, m) / dot(&self.denominator, m)
    }

    /// Derivative of the ratio given the monomials and their derivatives
    fn derivative(&self, m: &Monomials, dm: &Monomials) -> f64 {
        let num = dot(&self.numerator, m);
        let den = dot(&self.denominator, m);
        let dnum = dot(&self.numerator, dm);
        let dden = dot(&self.denominator, dm);
        (dnum * den - dden * num) / (den * den)
    }
}

/// Ground position from sensor position: lon and lat of (col, row, alt)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectFunctions {
    pub lon: RationalFunction,
    pub lat: RationalFunction,
}

/// Sensor position from ground position: col and row of (lon, lat, alt)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseFunctions {
    pub col: RationalFunction,
    pub row: RationalFunction,
}

/// Parameters of an RPC model as read from a metadata file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcParams {
    /// Format the coefficients were read from ("dimap_v1.0", "ossim_kwl", ...)
    pub driver_type: String,
    pub col: Normalization,
    pub row: Normalization,
    pub alt: Normalization,
    pub lon: Normalization,
    pub lat: Normalization,
    pub direct: Option<DirectFunctions>,
    pub inverse: Option<InverseFunctions>,
}

impl RpcParams {
    /// Move the pixel origin from the centre of the top-left pixel to its corner
    pub fn shift_to_top_left(&mut self) {
        self.col.offset += 0.5;
        self.row.offset += 0.5;
    }
}

/// RPC evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Normalised coordinate magnitude above which evaluation is extrapolated
    pub extrapolation_limit: f64,
    /// Maximum iterations of the iterative direct localization
    pub max_iterations: usize,
    /// Target precision of the iterative direct localization (pixels)
    pub precision: f64,
    /// Terrain intersection used by `direct_loc_dtm`
    pub intersection: IntersectionConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            extrapolation_limit: 1.0001,
            max_iterations: 10,
            precision: 1e-6,
            intersection: IntersectionConfig::default(),
        }
    }
}

/// How direct localization is computed
#[derive(Clone, Copy)]
enum DirectSolver<'a> {
    Direct(&'a DirectFunctions),
    Iterative(&'a InverseFunctions),
}

/// RPC geometric model
#[derive(Debug, Clone)]
pub struct Rpc {
    params: RpcParams,
    config: RpcConfig,
}

impl Rpc {
    pub fn new(params: RpcParams) -> GeoResult<Self> {
        if params.direct.is_none() && params.inverse.is_none() {
            return Err(GeoError::MissingCoefficients(format!(
                "{} model defines neither direct nor inverse coefficients",
                params.driver_type
            )));
        }
        for (name, norm) in [
            ("col", &params.col),
            ("row", &params.row),
            ("alt", &params.alt),
            ("lon", &params.lon),
            ("lat", &params.lat),
        ] {
            if norm.scale == 0.0 || !norm.scale.is_finite() || !norm.offset.is_finite() {
                return Err(GeoError::InvalidFormat(format!(
                    "Invalid {} normalisation: {:?}",
                    name, norm
                )));
            }
        }

        log::debug!(
            "RPC model created from {} (direct: {}, inverse: {})",
            params.driver_type,
            params.direct.is_some(),
            params.inverse.is_some()
        );

        Ok(Self {
            params,
            config: RpcConfig::default(),
        })
    }

    pub fn with_config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn params(&self) -> &RpcParams {
        &self.params
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn driver_type(&self) -> &str {
        &self.params.driver_type
    }

    pub fn has_direct(&self) -> bool {
        self.params.direct.is_some()
    }

    pub fn has_inverse(&self) -> bool {
        self.params.inverse.is_some()
    }

    fn inverse_functions(&self) -> GeoResult<&InverseFunctions> {
        self.params.inverse.as_ref().ok_or_else(|| {
            GeoError::MissingCoefficients(format!(
                "inverse coefficients are not defined for {} model",
                self.params.driver_type
            ))
        })
    }

    fn default_solver(&self) -> GeoResult<DirectSolver<'_>> {
        match &self.params.direct {
            Some(direct) => Ok(DirectSolver::Direct(direct)),
            None => self.inverse_functions().map(DirectSolver::Iterative),
        }
    }

    /// (row, col) of a ground point
    fn inverse_point(&self, inverse: &InverseFunctions, lon: f64, lat: f64, alt: f64) -> (f64, f64) {
        let p = &self.params;
        let m = monomials(p.lon.normalize(lon), p.lat.normalize(lat), p.alt.normalize(alt));
        let col = p.col.denormalize(inverse.col.evaluate(&m));
        let row = p.row.denormalize(inverse.row.evaluate(&m));
        (row, col)
    }

    /// (lon, lat) of a sensor point using the direct functions
    fn direct_point(&self, direct: &DirectFunctions, row: f64, col: f64, alt: f64) -> (f64, f64) {
        let p = &self.params;
        let m = monomials(p.col.normalize(col), p.row.normalize(row), p.alt.normalize(alt));
        let lon = p.lon.denormalize(direct.lon.evaluate(&m));
        let lat = p.lat.denormalize(direct.lat.evaluate(&m));
        (lon, lat)
    }

    fn derivatives_point(
        &self,
        inverse: &InverseFunctions,
        lon: f64,
        lat: f64,
        alt: f64,
    ) -> (f64, f64, f64, f64) {
        let p = &self.params;
        let (x, y, z) = (p.lon.normalize(lon), p.lat.normalize(lat), p.alt.normalize(alt));
        let m = monomials(x, y, z);
        let (mdx, mdy) = monomial_derivatives(x, y, z);

        let dcdx = p.col.scale / p.lon.scale * inverse.col.derivative(&m, &mdx);
        let dcdy = p.col.scale / p.lat.scale * inverse.col.derivative(&m, &mdy);
        let dldx = p.row.scale / p.lon.scale * inverse.row.derivative(&m, &mdx);
        let dldy = p.row.scale / p.lat.scale * inverse.row.derivative(&m, &mdy);
        (dcdx, dcdy, dldx, dldy)
    }

    /// Analytic partial derivatives of the inverse localization
    ///
    /// Returns (dcol/dlon, dcol/dlat, drow/dlon, drow/dlat).
    pub fn partial_derivatives(&self, lon: f64, lat: f64, alt: f64) -> GeoResult<(f64, f64, f64, f64)> {
        let inverse = self.inverse_functions()?;
        Ok(self.derivatives_point(inverse, lon, lat, alt))
    }

    /// Newton iterations on the inverse model, starting at the scene centre
    fn solve_direct(&self, inverse: &InverseFunctions, row: f64, col: f64, alt: f64) -> (f64, f64) {
        let eps = self.config.precision;
        let mut lon = self.params.lon.offset;
        let mut lat = self.params.lat.offset;

        let (l0, c0) = self.inverse_point(inverse, lon, lat, alt);
        let mut dc = col - c0;
        let mut dl = row - l0;

        let mut iteration = 0;
        while (dc.abs() > eps || dl.abs() > eps) && iteration < self.config.max_iterations {
            let (cdx, cdy, ldx, ldy) = self.derivatives_point(inverse, lon, lat, alt);
            let det = cdx * ldy - ldx * cdy;

            lon += (ldy * dc - cdy * dl) / det;
            lat += (-ldx * dc + cdx * dl) / det;

            let (l, c) = self.inverse_point(inverse, lon, lat, alt);
            dc = col - c;
            dl = row - l;
            iteration += 1;
        }

        if dc.abs() > eps || dl.abs() > eps {
            log::trace!(
                "Iterative direct localization stopped after {} iterations, residual ({:e}, {:e})",
                iteration,
                dc,
                dl
            );
        }
        (lon, lat)
    }

    fn warn_if_extrapolated<I>(&self, axis: &str, normalized: I)
    where
        I: IntoIterator<Item = f64>,
    {
        let limit = self.config.extrapolation_limit;
        let mut count = 0;
        for value in normalized {
            if !(value.abs() > limit) {
                return;
            }
            count += 1;
        }
        if count > 0 {
            log::warn!("RPC evaluation is extrapolated in {} for {} points", axis, count);
        }
    }

    fn warn_if_altitude_extrapolated(&self, alt: Heights<'_>, n: usize) {
        match alt {
            Heights::Constant(h) => {
                if n > 0 {
                    self.warn_if_extrapolated("altitude", std::iter::once(self.params.alt.normalize(h)))
                }
            }
            Heights::PerPoint(alts) => {
                self.warn_if_extrapolated("altitude", alts.iter().map(|&h| self.params.alt.normalize(h)))
            }
        }
    }

    /// Ground position of one pixel, NaN when it cannot be resolved; never logs
    fn locate_point(&self, solver: DirectSolver<'_>, row: f64, col: f64, alt: f64) -> (f64, f64) {
        if !row.is_finite() || !col.is_finite() {
            return (f64::NAN, f64::NAN);
        }
        match solver {
            DirectSolver::Direct(direct) => self.direct_point(direct, row, col, alt),
            DirectSolver::Iterative(inverse) => self.solve_direct(inverse, row, col, alt),
        }
    }

    fn direct_loc_with(
        &self,
        solver: DirectSolver<'_>,
        row: &[f64],
        col: &[f64],
        alt: Heights<'_>,
        fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        let n = row.len();
        check_lengths("col", col.len(), n)?;
        alt.check_len(n)?;

        let p = &self.params;
        self.warn_if_extrapolated("column", col.iter().map(|&c| p.col.normalize(c)));
        self.warn_if_extrapolated("row", row.iter().map(|&r| p.row.normalize(r)));
        self.warn_if_altitude_extrapolated(alt, n);

        // OTB/OSSIM convention: unresolved points land on the scene centre
        let (fill_lon, fill_lat) = if fill_nan {
            (f64::NAN, f64::NAN)
        } else {
            (p.lon.offset, p.lat.offset)
        };

        let points: Vec<[f64; 3]> = (0..n)
            .into_par_iter()
            .map(|i| {
                let h = alt.at(i);
                let (lon, lat) = self.locate_point(solver, row[i], col[i], h);
                if lon.is_finite() && lat.is_finite() {
                    [lon, lat, h]
                } else {
                    [fill_lon, fill_lat, h]
                }
            })
            .collect();

        Ok(Array2::from(points))
    }

    /// Direct localization through the inverse functions only
    pub fn direct_loc_inverse_iterative(
        &self,
        row: &[f64],
        col: &[f64],
        alt: Heights<'_>,
        fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        let inverse = self.inverse_functions()?;
        self.direct_loc_with(DirectSolver::Iterative(inverse), row, col, alt, fill_nan)
    }

    /// Longitude and latitude grids of direct localization at constant altitude
    #[allow(clippy::too_many_arguments)]
    pub fn direct_loc_grid_h(
        &self,
        row0: f64,
        col0: f64,
        steprow: f64,
        stepcol: f64,
        nbrow: usize,
        nbcol: usize,
        alt: f64,
    ) -> GeoResult<(Array2<f64>, Array2<f64>)> {
        let mut rows = Vec::with_capacity(nbrow * nbcol);
        let mut cols = Vec::with_capacity(nbrow * nbcol);
        for l in 0..nbrow {
            for c in 0..nbcol {
                rows.push(row0 + steprow * l as f64);
                cols.push(col0 + stepcol * c as f64);
            }
        }

        let ground = self.direct_loc_h(&rows, &cols, alt, true)?;
        let grid_lon = Array2::from_shape_fn((nbrow, nbcol), |(l, c)| ground[[l * nbcol + c, 0]]);
        let grid_lat = Array2::from_shape_fn((nbrow, nbcol), |(l, c)| ground[[l * nbcol + c, 1]]);
        Ok((grid_lon, grid_lat))
    }

    /// Altitude validity domain of the model, (min, max)
    pub fn alt_min_max(&self) -> (f64, f64) {
        let alt = &self.params.alt;
        (alt.offset - alt.scale / 2.0, alt.offset + alt.scale / 2.0)
    }

    /// Ends of the line of sight of a pixel: row 0 at `alt_max`, row 1 at `alt_min`
    pub fn los_extrema(&self, row: f64, col: f64, alt_min: f64, alt_max: f64) -> GeoResult<Array2<f64>> {
        let top = self.direct_loc_h(&[row], &[col], alt_max, true)?;
        let bottom = self.direct_loc_h(&[row], &[col], alt_min, true)?;
        let mut edges = Array2::zeros((2, 3));
        edges.row_mut(0).assign(&top.row(0));
        edges.row_mut(1).assign(&bottom.row(0));
        Ok(edges)
    }
}

impl GeoModel for Rpc {
    fn model_type(&self) -> &str {
        "rpc"
    }

    fn direct_loc_h(
        &self,
        row: &[f64],
        col: &[f64],
        alt: f64,
        fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        self.direct_loc_with(self.default_solver()?, row, col, Heights::Constant(alt), fill_nan)
    }

    fn direct_loc_h_points(
        &self,
        row: &[f64],
        col: &[f64],
        alt: &[f64],
        fill_nan: bool,
    ) -> GeoResult<GroundPositions> {
        self.direct_loc_with(self.default_solver()?, row, col, Heights::PerPoint(alt), fill_nan)
    }

    fn direct_loc_dtm(
        &self,
        row: &[f64],
        col: &[f64],
        dtm: &dyn ElevationModel,
    ) -> GeoResult<GroundPositions> {
        let solver = self.default_solver()?;
        check_lengths("col", col.len(), row.len())?;

        // the line of sight is sampled many times per pixel, check the inputs once
        let p = &self.params;
        self.warn_if_extrapolated("column", col.iter().map(|&c| p.col.normalize(c)));
        self.warn_if_extrapolated("row", row.iter().map(|&r| p.row.normalize(r)));
        if let Some((h_min, h_max)) = dtm.elevation_range() {
            self.warn_if_extrapolated("altitude", [h_min, h_max].map(|h| p.alt.normalize(h)));
        }

        intersect_with_locator(row, col, dtm, &self.config.intersection, |r, c, h| {
            let (lon, lat) = self.locate_point(solver, r, c, h);
            Ok((lon.is_finite() && lat.is_finite()).then_some((lon, lat)))
        })
    }

    fn inverse_loc(&self, lon: &[f64], lat: &[f64], alt: Heights<'_>) -> GeoResult<InverseLocation> {
        let inverse = self.inverse_functions()?;
        let n = lon.len();
        check_lengths("lat", lat.len(), n)?;
        alt.check_len(n)?;

        let p = &self.params;
        self.warn_if_extrapolated("longitude", lon.iter().map(|&x| p.lon.normalize(x)));
        self.warn_if_extrapolated("latitude", lat.iter().map(|&y| p.lat.normalize(y)));
        self.warn_if_altitude_extrapolated(alt, n);

        let sensor: Vec<(f64, f64, f64)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let h = alt.at(i);
                let (row, col) = self.inverse_point(inverse, lon[i], lat[i], h);
                (row, col, h)
            })
            .collect();

        Ok(sensor.into_iter().collect())
    }
}
