//! shareloc: geometric localization of satellite images
//!
//! This library maps sensor image positions to ground positions and back
//! through a common geometric model interface. It provides rational
//! polynomial (RPC) sensor models read from DIMAP, OSSIM and Euclidium
//! files, terrain intersection, co-localization between images and
//! stereo-rectification grids.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{GeoError, GeoResult, GeoTransform, GroundPositions, Heights, InverseLocation};

pub use crate::core::{
    coloc, Dtm, Elevation, ElevationModel, GeoModel, GeoModelTemplate, Image, Localization, Rpc,
};
pub use io::RpcReader;
#[cfg(feature = "gdal")]
pub use io::{write_epipolar_grid, DtmReader};

#[cfg(feature = "python")]
mod python {
    use crate::core::{GeoModel, GeoModelTemplate, Rpc};
    use crate::io::{RpcReader, DEFAULT_TOP_LEFT_CONVENTION};
    use crate::types::{GeoError, Heights};
    use numpy::{IntoPyArray, PyArray1, PyArray2};
    use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::path::Path;

    fn to_py_err(e: GeoError) -> PyErr {
        match e {
            GeoError::Io(_) => PyErr::new::<PyIOError, _>(format!("{}", e)),
            GeoError::LengthMismatch { .. } | GeoError::InvalidInput(_) => {
                PyErr::new::<PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<PyRuntimeError, _>(format!("{}", e)),
        }
    }

    type InverseArrays<'py> = (&'py PyArray1<f64>, &'py PyArray1<f64>, &'py PyArray1<f64>);

    fn direct_loc_h<'py>(
        py: Python<'py>,
        model: &dyn GeoModel,
        row: Vec<f64>,
        col: Vec<f64>,
        alt: f64,
        fill_nan: bool,
    ) -> PyResult<&'py PyArray2<f64>> {
        let ground = model.direct_loc_h(&row, &col, alt, fill_nan).map_err(to_py_err)?;
        Ok(ground.into_pyarray(py))
    }

    #[cfg(feature = "gdal")]
    fn direct_loc_dtm<'py>(
        py: Python<'py>,
        model: &dyn GeoModel,
        row: Vec<f64>,
        col: Vec<f64>,
        dtm: &str,
    ) -> PyResult<&'py PyArray2<f64>> {
        let terrain = crate::io::DtmReader::read_dtm(dtm).map_err(to_py_err)?;
        let ground = model.direct_loc_dtm(&row, &col, &terrain).map_err(to_py_err)?;
        Ok(ground.into_pyarray(py))
    }

    fn inverse_loc<'py>(
        py: Python<'py>,
        model: &dyn GeoModel,
        lon: Vec<f64>,
        lat: Vec<f64>,
        alt: f64,
    ) -> PyResult<InverseArrays<'py>> {
        let sensor = model
            .inverse_loc(&lon, &lat, Heights::Constant(alt))
            .map_err(to_py_err)?;
        Ok((
            sensor.row.into_pyarray(py),
            sensor.col.into_pyarray(py),
            sensor.alt.into_pyarray(py),
        ))
    }

    /// Python wrapper for GeoModelTemplate
    #[pyclass(name = "GeoModelTemplate")]
    struct PyGeoModelTemplate {
        inner: GeoModelTemplate,
    }

    #[pymethods]
    impl PyGeoModelTemplate {
        #[new]
        fn new() -> Self {
            PyGeoModelTemplate {
                inner: GeoModelTemplate::new(),
            }
        }

        #[getter]
        fn type_name(&self) -> String {
            self.inner.model_type().to_string()
        }

        #[pyo3(signature = (row, col, alt, fill_nan = false))]
        fn direct_loc_h<'py>(
            &self,
            py: Python<'py>,
            row: Vec<f64>,
            col: Vec<f64>,
            alt: f64,
            fill_nan: bool,
        ) -> PyResult<&'py PyArray2<f64>> {
            direct_loc_h(py, &self.inner, row, col, alt, fill_nan)
        }

        #[cfg(feature = "gdal")]
        fn direct_loc_dtm<'py>(
            &self,
            py: Python<'py>,
            row: Vec<f64>,
            col: Vec<f64>,
            dtm: &str,
        ) -> PyResult<&'py PyArray2<f64>> {
            direct_loc_dtm(py, &self.inner, row, col, dtm)
        }

        fn inverse_loc<'py>(
            &self,
            py: Python<'py>,
            lon: Vec<f64>,
            lat: Vec<f64>,
            alt: f64,
        ) -> PyResult<InverseArrays<'py>> {
            inverse_loc(py, &self.inner, lon, lat, alt)
        }
    }

    /// Python wrapper for Rpc
    #[pyclass(name = "RPC")]
    struct PyRpc {
        inner: Rpc,
    }

    #[pymethods]
    impl PyRpc {
        #[staticmethod]
        #[pyo3(signature = (
            primary,
            secondary = None,
            topleftconvention = DEFAULT_TOP_LEFT_CONVENTION
        ))]
        fn from_any(
            primary: String,
            secondary: Option<String>,
            topleftconvention: bool,
        ) -> PyResult<Self> {
            let secondary = secondary.as_deref().map(Path::new);
            let rpc = RpcReader::from_any(&primary, secondary, topleftconvention).map_err(to_py_err)?;
            Ok(PyRpc { inner: rpc })
        }

        #[getter]
        fn type_name(&self) -> String {
            self.inner.model_type().to_string()
        }

        #[getter]
        fn driver_type(&self) -> String {
            self.inner.driver_type().to_string()
        }

        #[pyo3(signature = (row, col, alt, fill_nan = false))]
        fn direct_loc_h<'py>(
            &self,
            py: Python<'py>,
            row: Vec<f64>,
            col: Vec<f64>,
            alt: f64,
            fill_nan: bool,
        ) -> PyResult<&'py PyArray2<f64>> {
            direct_loc_h(py, &self.inner, row, col, alt, fill_nan)
        }

        #[cfg(feature = "gdal")]
        fn direct_loc_dtm<'py>(
            &self,
            py: Python<'py>,
            row: Vec<f64>,
            col: Vec<f64>,
            dtm: &str,
        ) -> PyResult<&'py PyArray2<f64>> {
            direct_loc_dtm(py, &self.inner, row, col, dtm)
        }

        fn inverse_loc<'py>(
            &self,
            py: Python<'py>,
            lon: Vec<f64>,
            lat: Vec<f64>,
            alt: f64,
        ) -> PyResult<InverseArrays<'py>> {
            inverse_loc(py, &self.inner, lon, lat, alt)
        }

        fn __str__(&self) -> String {
            format!(
                "RPC(driver_type='{}', direct={}, inverse={})",
                self.inner.driver_type(),
                self.inner.has_direct(),
                self.inner.has_inverse()
            )
        }
    }

    /// Python module definition
    #[pymodule]
    fn shareloc(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyGeoModelTemplate>()?;
        m.add_class::<PyRpc>()?;
        Ok(())
    }
}
