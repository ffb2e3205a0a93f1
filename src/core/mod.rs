//! Core geometric modules

pub mod dtm;
pub mod geomodel;
pub mod localization;
pub mod rectification;
pub mod rpc;

// Re-export main types
pub use dtm::{intersect_line_of_sight, Dtm, ElevationModel, IntersectionConfig};
pub use geomodel::{GeoModel, GeoModelTemplate};
pub use localization::{coloc, Elevation, Image, Localization};
pub use rectification::{
    compute_stereorectification_epipolar_grids, compute_strip_of_epipolar_grid,
    positions_to_displacement_grid, EpipolarGrid, EpipolarGrids, EpipolarStrip, RectificationGeometry,
};
pub use rpc::{Normalization, RationalFunction, Rpc, RpcConfig, RpcParams};
