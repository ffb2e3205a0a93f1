//! File readers and writers

pub mod rpc_reader;
#[cfg(feature = "gdal")]
pub mod dem;
#[cfg(feature = "gdal")]
pub mod grid_writer;

pub use rpc_reader::{EuclidiumFile, EuclidiumKind, RpcReader, DEFAULT_TOP_LEFT_CONVENTION};
#[cfg(feature = "gdal")]
pub use dem::DtmReader;
#[cfg(feature = "gdal")]
pub use grid_writer::write_epipolar_grid;
