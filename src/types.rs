use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Ground positions, one `[lon, lat, alt]` row per point
pub type GroundPositions = Array2<f64>;

/// Geospatial transformation parameters (GDAL ordering)
///
/// `x = top_left_x + col * pixel_width + row * rotation_x`
/// `y = top_left_y + col * rotation_y + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Identity transform: physical coordinates are pixel coordinates
    pub fn identity() -> Self {
        Self {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 0.0,
            rotation_y: 0.0,
            pixel_height: 1.0,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Apply the transform to fractional pixel coordinates, returns (x, y)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Inverse of [`GeoTransform::apply`], returns (col, row)
    pub fn invert(&self, x: f64, y: f64) -> GeoResult<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det == 0.0 || !det.is_finite() {
            return Err(GeoError::InvalidInput(format!(
                "Geotransform is not invertible: {:?}",
                self
            )));
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Ok((col, row))
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Altitudes supplied to a localization call
#[derive(Debug, Clone, Copy)]
pub enum Heights<'a> {
    /// Same altitude for every point
    Constant(f64),
    /// One altitude per point
    PerPoint(&'a [f64]),
}

impl<'a> Heights<'a> {
    /// Check that per-point altitudes match the number of points
    pub fn check_len(&self, n: usize) -> GeoResult<()> {
        match self {
            Heights::Constant(_) => Ok(()),
            Heights::PerPoint(alts) => check_lengths("alt", alts.len(), n),
        }
    }

    /// Altitude of point `i`; callers check the length with `check_len` first
    pub(crate) fn at(&self, i: usize) -> f64 {
        match self {
            Heights::Constant(alt) => *alt,
            Heights::PerPoint(alts) => alts[i],
        }
    }
}

impl From<f64> for Heights<'_> {
    fn from(alt: f64) -> Self {
        Heights::Constant(alt)
    }
}

impl<'a> From<&'a [f64]> for Heights<'a> {
    fn from(alts: &'a [f64]) -> Self {
        Heights::PerPoint(alts)
    }
}

impl<'a> From<&'a Vec<f64>> for Heights<'a> {
    fn from(alts: &'a Vec<f64>) -> Self {
        Heights::PerPoint(alts.as_slice())
    }
}

/// Sensor positions returned by inverse localization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InverseLocation {
    pub row: Vec<f64>,
    pub col: Vec<f64>,
    pub alt: Vec<f64>,
}

impl InverseLocation {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            row: Vec::with_capacity(n),
            col: Vec::with_capacity(n),
            alt: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, row: f64, col: f64, alt: f64) {
        self.row.push(row);
        self.col.push(col);
        self.alt.push(alt);
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }
}

impl FromIterator<(f64, f64, f64)> for InverseLocation {
    fn from_iter<I: IntoIterator<Item = (f64, f64, f64)>>(iter: I) -> Self {
        let mut out = InverseLocation::default();
        for (row, col, alt) in iter {
            out.push(row, col, alt);
        }
        out
    }
}

/// Error types for geolocation
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Length mismatch: {name} has {found} elements, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Missing coefficients: {0}")]
    MissingCoefficients(String),

    #[error("Terrain model error: {0}")]
    Dtm(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for geolocation operations
pub type GeoResult<T> = Result<T, GeoError>;

/// Fail with `LengthMismatch` unless `found == expected`
pub fn check_lengths(name: &'static str, found: usize, expected: usize) -> GeoResult<()> {
    if found != expected {
        return Err(GeoError::LengthMismatch {
            name,
            expected,
            found,
        });
    }
    Ok(())
}
