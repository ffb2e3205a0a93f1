//! Stereo-rectification epipolar grids
//!
//! Epipolar geometry is followed locally: a left point is co-localized in
//! the right image, then brought back to the left image at two altitudes
//! around the ground. The segment between both returns is the local
//! epipolar line, whose angle drives the walk along (and across) the lines.

use crate::core::geomodel::GeoModel;
use crate::core::localization::{coloc, Elevation, Image, Localization};
use crate::types::{check_lengths, GeoError, GeoResult, GeoTransform, InverseLocation};
use ndarray::{s, Array1, Array2, Array3, Axis};
use std::f64::consts::PI;

/// Two-band displacement grid: band 0 row displacement, band 1 col displacement
#[derive(Debug, Clone)]
pub struct EpipolarGrid {
    pub data: Array3<f64>,
    pub transform: GeoTransform,
}

impl EpipolarGrid {
    pub fn nb_rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn nb_cols(&self) -> usize {
        self.data.dim().2
    }

    pub fn transform_index_to_physical_point(&self, row: f64, col: f64) -> (f64, f64) {
        Image::new(self.nb_rows(), self.nb_cols(), self.transform)
            .transform_index_to_physical_point(row, col)
    }
}

/// Size and placement of the rectified geometry
#[derive(Debug, Clone)]
pub struct RectificationGeometry {
    /// Grid spacing [row, col]
    pub grid_pixel_size: [f64; 2],
    /// Grid size [rows, cols]
    pub grid_size: [usize; 2],
    /// Epipolar image size [rows, cols]
    pub rectified_image_size: [usize; 2],
    /// [ul, ll, lr, ur] corners in left image geometry, one [row, col, alt] per row
    pub footprint: Array2<f64>,
}

/// Result of the epipolar grid generation
#[derive(Debug, Clone)]
pub struct EpipolarGrids {
    pub left: EpipolarGrid,
    pub right: EpipolarGrid,
    pub nb_rows: usize,
    pub nb_cols: usize,
    pub mean_baseline_ratio: f64,
}

/// Displacement direction in epipolar geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpipolarAxis {
    /// Move along the epipolar line
    AlongLine,
    /// Move to the next epipolar line
    NextLine,
}

impl EpipolarAxis {
    fn angle_offset(self) -> f64 {
        match self {
            EpipolarAxis::AlongLine => 0.0,
            EpipolarAxis::NextLine => PI / 2.0,
        }
    }
}

fn positions(sensor: InverseLocation) -> Array2<f64> {
    let points: Vec<[f64; 3]> = sensor
        .row
        .iter()
        .zip(sensor.col.iter())
        .zip(sensor.alt.iter())
        .map(|((&r, &c), &h)| [r, c, h])
        .collect();
    Array2::from(points)
}

/// Angle of the epipolar line from `start_line` to `end_line`, per point
///
/// Inputs hold one [row, col, ...] per row.
pub fn compute_epipolar_angle(end_line: &Array2<f64>, start_line: &Array2<f64>) -> Array1<f64> {
    Array1::from_shape_fn(end_line.nrows(), |i| {
        let (end_row, end_col) = (end_line[[i, 0]], end_line[[i, 1]]);
        let (start_row, start_col) = (start_line[[i, 0]], start_line[[i, 1]]);

        if end_col == start_col {
            if end_row > start_row {
                0.5 * PI
            } else {
                -0.5 * PI
            }
        } else {
            let slope = (end_row - start_row) / (end_col - start_col);
            if end_col > start_col {
                slope.atan()
            } else {
                PI + slope.atan()
            }
        }
    })
}

/// Start and end of the local epipolar line through each left point
pub fn compute_local_epipolar_line(
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    left_point: &Array2<f64>,
    elevation: Elevation<'_>,
    elevation_offset: f64,
) -> GeoResult<(Array2<f64>, Array2<f64>)> {
    let rows = left_point.column(0).to_vec();
    let cols = left_point.column(1).to_vec();

    let right_corr = coloc(
        geom_model_left,
        geom_model_right,
        &rows,
        &cols,
        elevation,
        None,
        None,
        false,
    )?;

    let lower: Vec<f64> = right_corr.alt.iter().map(|h| h - elevation_offset).collect();
    let upper: Vec<f64> = right_corr.alt.iter().map(|h| h + elevation_offset).collect();

    let start = coloc(
        geom_model_right,
        geom_model_left,
        &right_corr.row,
        &right_corr.col,
        Elevation::PerPoint(&lower),
        None,
        None,
        false,
    )?;
    let end = coloc(
        geom_model_right,
        geom_model_left,
        &right_corr.row,
        &right_corr.col,
        Elevation::PerPoint(&upper),
        None,
        None,
        false,
    )?;

    Ok((positions(start), positions(end)))
}

fn check_step(epi_step: f64) -> GeoResult<()> {
    if !(epi_step > 0.0) {
        return Err(GeoError::InvalidInput(format!(
            "Epipolar step must be positive, got {}",
            epi_step
        )));
    }
    Ok(())
}

fn mean_spacing(image: &Image) -> f64 {
    0.5 * (image.pixel_size_col().abs() + image.pixel_size_row().abs())
}

/// Grid spacing and size, epipolar image size and footprint of the rectification
pub fn prepare_rectification(
    left_im: &Image,
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    elevation: Elevation<'_>,
    epi_step: f64,
    elevation_offset: f64,
) -> GeoResult<RectificationGeometry> {
    check_step(epi_step)?;

    let spacing = mean_spacing(left_im);
    let grid_pixel_size = [epi_step * spacing, epi_step * spacing];

    let (origin_row, origin_col) = left_im.transform_index_to_physical_point(0.0, 0.0);
    let origin = Array2::from(vec![[origin_row, origin_col, 0.0]]);

    let (start, end) =
        compute_local_epipolar_line(geom_model_left, geom_model_right, &origin, elevation, elevation_offset)?;
    let alpha = compute_epipolar_angle(&end, &start)[0];
    if !alpha.is_finite() {
        return Err(GeoError::InvalidInput(
            "Epipolar angle at the image origin cannot be resolved".to_string(),
        ));
    }

    // unit vectors along the epipolar line and towards the next line
    let (along_x, along_y) = (alpha.cos(), alpha.sin());
    let (ortho_x, ortho_y) = (-alpha.sin(), alpha.cos());

    let width = left_im.nb_columns as f64 * left_im.pixel_size_col();
    let height = left_im.nb_rows as f64 * left_im.pixel_size_row();

    // corners of the left image in epipolar geometry
    let (ulx, uly) = (0.0, 0.0);
    let (urx, ury) = (along_x * width, ortho_x * width);
    let (llx, lly) = (along_y * height, ortho_y * height);
    let (lrx, lry) = (along_x * width + along_y * height, ortho_x * width + ortho_y * height);

    let minx = urx.min(llx).min(lrx).min(ulx);
    let miny = ury.min(lly).min(lry).min(uly);
    let maxx = urx.max(llx).max(lrx).max(ulx);
    let maxy = ury.max(lly).max(lry).max(uly);

    let rectified_image_size = [
        ((maxy - miny) / spacing) as usize,
        ((maxx - minx) / spacing) as usize,
    ];

    let mean_alt = (start[[0, 2]] + end[[0, 2]]) / 2.0;
    let corner = |x: f64, y: f64| {
        [
            origin_row + along_y * x + ortho_y * y,
            origin_col + along_x * x + ortho_x * y,
            mean_alt,
        ]
    };
    let footprint = Array2::from(vec![
        corner(minx, miny),
        corner(maxx + epi_step, miny),
        corner(maxx + epi_step, maxy + epi_step),
        corner(minx, maxy + epi_step),
    ]);

    // two extra cells match the OTB grid conventions
    let grid_size = [
        (rectified_image_size[0] as f64 / epi_step + 2.0) as usize,
        (rectified_image_size[1] as f64 / epi_step + 2.0) as usize,
    ];

    log::debug!(
        "Epipolar angle {:.6} rad, rectified image {:?}, grid {:?}",
        alpha,
        rectified_image_size,
        grid_size
    );

    Ok(RectificationGeometry {
        grid_pixel_size,
        grid_size,
        rectified_image_size,
        footprint,
    })
}

/// Ground extent `[lat_min, lon_min, lat_max, lon_max]` of the epipolar footprint
#[allow(clippy::too_many_arguments)]
pub fn get_epipolar_extent(
    left_im: &Image,
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    elevation: Elevation<'_>,
    epi_step: f64,
    elevation_offset: f64,
    margin: f64,
) -> GeoResult<[f64; 4]> {
    let geometry = prepare_rectification(
        left_im,
        geom_model_left,
        geom_model_right,
        elevation,
        epi_step,
        elevation_offset,
    )?;

    let loc_left = Localization::new(geom_model_left, Elevation::Constant(0.0), Some(left_im));
    let rows = geometry.footprint.column(0).to_vec();
    let cols = geometry.footprint.column(1).to_vec();
    let ground = loc_left.direct(&rows, &cols, false)?;

    let (mut lon_min, mut lat_min) = (f64::INFINITY, f64::INFINITY);
    let (mut lon_max, mut lat_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for point in ground.outer_iter() {
        lon_min = lon_min.min(point[0]);
        lon_max = lon_max.max(point[0]);
        lat_min = lat_min.min(point[1]);
        lat_max = lat_max.max(point[1]);
    }

    Ok([lat_min - margin, lon_min - margin, lat_max + margin, lon_max + margin])
}

/// Zeroed left and right grids with the epipolar step geotransform
pub fn initialize_grids(epi_step: f64, nb_row: usize, nb_col: usize) -> (EpipolarGrid, EpipolarGrid) {
    let transform = GeoTransform {
        top_left_x: -(epi_step * 0.5),
        pixel_width: epi_step,
        rotation_x: 0.0,
        top_left_y: -(epi_step * 0.5),
        rotation_y: 0.0,
        pixel_height: epi_step,
    };
    let grid = EpipolarGrid {
        data: Array3::zeros((2, nb_row, nb_col)),
        transform,
    };
    (grid.clone(), grid)
}

/// Step every current left point once in epipolar geometry
///
/// Returns the new left positions and their right correspondents.
#[allow(clippy::too_many_arguments)]
pub fn moving_along_axis(
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    current_coords: &Array2<f64>,
    spacing: f64,
    elevation: Elevation<'_>,
    epi_step: f64,
    epi_angles: &Array1<f64>,
    axis: EpipolarAxis,
) -> GeoResult<(Array2<f64>, Array2<f64>)> {
    check_lengths("epipolar angles", epi_angles.len(), current_coords.nrows())?;

    let mut next_left = current_coords.clone();
    for (mut point, &angle) in next_left.outer_iter_mut().zip(epi_angles.iter()) {
        let angle = angle + axis.angle_offset();
        point[0] += epi_step * spacing * angle.sin();
        point[1] += epi_step * spacing * angle.cos();
    }

    let rows = next_left.column(0).to_vec();
    let cols = next_left.column(1).to_vec();
    let next_right = coloc(
        geom_model_left,
        geom_model_right,
        &rows,
        &cols,
        elevation,
        None,
        None,
        false,
    )?;

    Ok((next_left, positions(next_right)))
}

/// Positions visited by a strip walk in epipolar geometry
#[derive(Debug, Clone)]
pub struct EpipolarStrip {
    /// Left [row, col, alt] layers × grid rows × grid cols
    pub left: Array3<f64>,
    /// Right correspondents of `left`, same layout
    pub right: Array3<f64>,
    /// Epipolar angle used at each step (rows) for each starting point (cols)
    pub alphas: Array2<f64>,
    pub mean_baseline_ratio: f64,
}

fn baseline_ratio_sum(start: &Array2<f64>, end: &Array2<f64>, elevation_offset: f64) -> f64 {
    start
        .outer_iter()
        .zip(end.outer_iter())
        .map(|(s, e)| {
            let d_row = e[0] - s[0];
            let d_col = e[1] - s[1];
            (d_col * d_col + d_row * d_row).sqrt() / (2.0 * elevation_offset)
        })
        .sum()
}

/// Walk `size` steps along `axis` from each starting point
///
/// `start_left` and `start_right` hold one [row, col, alt] per starting point.
/// Along the line, starting point `i` fills grid row `i`; towards the next
/// line it fills grid column `i`. Without `alphas` the epipolar angle is
/// recomputed at every step, otherwise the given angle of each starting point
/// is kept for the whole walk.
#[allow(clippy::too_many_arguments)]
pub fn compute_strip_of_epipolar_grid(
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    start_left: &Array2<f64>,
    start_right: &Array2<f64>,
    size: usize,
    spacing: f64,
    axis: EpipolarAxis,
    epi_step: f64,
    elevation: Elevation<'_>,
    elevation_offset: f64,
    alphas: Option<&Array1<f64>>,
) -> GeoResult<EpipolarStrip> {
    check_step(epi_step)?;
    let nb_points = start_left.nrows();
    if nb_points == 0 || size == 0 {
        return Err(GeoError::InvalidInput(format!(
            "Empty epipolar strip: {} starting points, {} steps",
            nb_points, size
        )));
    }
    check_lengths("left start coordinates", start_left.ncols(), 3)?;
    check_lengths("right start coordinates", start_right.ncols(), 3)?;
    check_lengths("right start points", start_right.nrows(), nb_points)?;
    if let Some(alphas) = alphas {
        check_lengths("epipolar angles", alphas.len(), nb_points)?;
    }

    let shape = match axis {
        EpipolarAxis::AlongLine => (3, nb_points, size),
        EpipolarAxis::NextLine => (3, size, nb_points),
    };
    let mut left_positions = Array3::zeros(shape);
    let mut right_positions = Array3::zeros(shape);
    let mut alpha_out = Array2::zeros((size, nb_points));
    let mut baseline = 0.0;

    let mut current_left = start_left.clone();
    let mut current_right = start_right.clone();

    for step in 0..size {
        for point in 0..nb_points {
            let (row, col) = match axis {
                EpipolarAxis::AlongLine => (point, step),
                EpipolarAxis::NextLine => (step, point),
            };
            for layer in 0..3 {
                left_positions[[layer, row, col]] = current_left[[point, layer]];
                right_positions[[layer, row, col]] = current_right[[point, layer]];
            }
        }

        let (start, end) = compute_local_epipolar_line(
            geom_model_left,
            geom_model_right,
            &current_left,
            elevation,
            elevation_offset,
        )?;
        baseline += baseline_ratio_sum(&start, &end, elevation_offset);

        let step_alphas = match alphas {
            Some(alphas) => alphas.clone(),
            None => compute_epipolar_angle(&end, &start),
        };
        alpha_out.row_mut(step).assign(&step_alphas);

        if step + 1 < size {
            let (next_left, next_right) = moving_along_axis(
                geom_model_left,
                geom_model_right,
                &current_left,
                spacing,
                elevation,
                epi_step,
                &step_alphas,
                axis,
            )?;
            current_left = next_left;
            current_right = next_right;
        }
    }

    Ok(EpipolarStrip {
        left: left_positions,
        right: right_positions,
        alphas: alpha_out,
        mean_baseline_ratio: baseline / (size * nb_points) as f64,
    })
}

/// Displacement grids from left and right position grids
///
/// Positions hold [row, col, ...] layers × grid rows × grid cols. Each grid
/// node gets its position minus its own epipolar grid coordinate.
pub fn positions_to_displacement_grid(
    left_positions: &Array3<f64>,
    right_positions: &Array3<f64>,
    epi_step: f64,
) -> GeoResult<(EpipolarGrid, EpipolarGrid)> {
    check_step(epi_step)?;
    let (layers, nb_rows, nb_cols) = left_positions.dim();
    if layers < 2 {
        return Err(GeoError::InvalidInput(format!(
            "Position grids need row and col layers, got {}",
            layers
        )));
    }
    if right_positions.dim() != left_positions.dim() {
        return Err(GeoError::InvalidInput(format!(
            "Left and right position grids differ: {:?} and {:?}",
            left_positions.dim(),
            right_positions.dim()
        )));
    }

    let (mut left_grid, mut right_grid) = initialize_grids(epi_step, nb_rows, nb_cols);
    for row in 0..nb_rows {
        for col in 0..nb_cols {
            let (row_geo, col_geo) =
                left_grid.transform_index_to_physical_point(row as f64, col as f64);
            left_grid.data[[0, row, col]] = left_positions[[0, row, col]] - row_geo;
            left_grid.data[[1, row, col]] = left_positions[[1, row, col]] - col_geo;
            right_grid.data[[0, row, col]] = right_positions[[0, row, col]] - row_geo;
            right_grid.data[[1, row, col]] = right_positions[[1, row, col]] - col_geo;
        }
    }
    Ok((left_grid, right_grid))
}

/// Left and right stereo-rectification displacement grids
pub fn compute_stereorectification_epipolar_grids(
    left_im: &Image,
    geom_model_left: &dyn GeoModel,
    geom_model_right: &dyn GeoModel,
    elevation: Elevation<'_>,
    epi_step: f64,
    elevation_offset: f64,
) -> GeoResult<EpipolarGrids> {
    let geometry = prepare_rectification(
        left_im,
        geom_model_left,
        geom_model_right,
        elevation,
        epi_step,
        elevation_offset,
    )?;
    let spacing = mean_spacing(left_im);
    let [nb_grid_rows, nb_grid_cols] = geometry.grid_size;

    // upper-left origin of the epipolar image and its right correspondent
    let start_left = geometry.footprint.slice(s![0..1, ..]).to_owned();
    let start_right = positions(coloc(
        geom_model_left,
        geom_model_right,
        &[start_left[[0, 0]]],
        &[start_left[[0, 1]]],
        elevation,
        None,
        None,
        false,
    )?);

    // starting point of every epipolar line
    let first_column = compute_strip_of_epipolar_grid(
        geom_model_left,
        geom_model_right,
        &start_left,
        &start_right,
        nb_grid_rows,
        spacing,
        EpipolarAxis::NextLine,
        epi_step,
        elevation,
        elevation_offset,
        None,
    )?;
    let line_starts_left = first_column.left.index_axis(Axis(2), 0).t().to_owned();
    let line_starts_right = first_column.right.index_axis(Axis(2), 0).t().to_owned();

    // walk along every line, one grid column at a time
    let lines = compute_strip_of_epipolar_grid(
        geom_model_left,
        geom_model_right,
        &line_starts_left,
        &line_starts_right,
        nb_grid_cols,
        spacing,
        EpipolarAxis::AlongLine,
        epi_step,
        elevation,
        elevation_offset,
        None,
    )?;
    let (left_grid, right_grid) = positions_to_displacement_grid(&lines.left, &lines.right, epi_step)?;
    let mean_baseline_ratio = lines.mean_baseline_ratio;

    log::info!(
        "Epipolar grids {}x{}, rectified image {}x{}, mean baseline ratio {:.6}",
        nb_grid_rows,
        nb_grid_cols,
        geometry.rectified_image_size[0],
        geometry.rectified_image_size[1],
        mean_baseline_ratio
    );

    Ok(EpipolarGrids {
        left: left_grid,
        right: right_grid,
        nb_rows: geometry.rectified_image_size[0],
        nb_cols: geometry.rectified_image_size[1],
        mean_baseline_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_epipolar_angle_quadrants() {
        let start = Array2::from(vec![[0.0, 0.0, 0.0]; 4]);
        let end = Array2::from(vec![
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, -1.0, 0.0],
        ]);
        let alpha = compute_epipolar_angle(&end, &start);
        assert_relative_eq!(alpha[0], PI / 2.0);
        assert_relative_eq!(alpha[1], -PI / 2.0);
        assert_relative_eq!(alpha[2], PI / 4.0);
        assert_relative_eq!(alpha[3], PI - PI / 4.0);
    }

    #[test]
    fn test_initialize_grids() {
        let (left, right) = initialize_grids(30.0, 4, 7);
        assert_eq!(left.data.dim(), (2, 4, 7));
        assert_eq!(right.nb_rows(), 4);
        assert_eq!(right.nb_cols(), 7);
        assert!(left.data.iter().all(|&v| v == 0.0));
        // grid index (r, c) sits at (30 r, 30 c)
        assert_eq!(left.transform_index_to_physical_point(2.0, 3.0), (60.0, 90.0));
    }

    #[test]
    fn test_positions_to_displacement_grid() {
        // node (r, c) of a 10-step grid sits at (10 r, 10 c)
        let left = Array3::from_shape_fn((3, 2, 3), |(layer, r, c)| match layer {
            0 => 10.0 * r as f64 + 1.0,
            1 => 10.0 * c as f64 - 2.0,
            _ => 100.0,
        });
        let right = left.mapv(|v| v + 0.5);

        let (left_grid, right_grid) = positions_to_displacement_grid(&left, &right, 10.0).unwrap();
        assert_eq!(left_grid.data.dim(), (2, 2, 3));
        assert!(left_grid.data.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
        assert!(left_grid.data.index_axis(Axis(0), 1).iter().all(|&v| v == -2.0));
        assert!(right_grid.data.index_axis(Axis(0), 0).iter().all(|&v| v == 1.5));
        assert_eq!(right_grid.transform.top_left_y, -5.0);

        let narrow = right.slice(s![.., .., 0..2]).to_owned();
        assert!(positions_to_displacement_grid(&left, &narrow, 10.0).is_err());
        let single_layer = Array3::zeros((1, 2, 2));
        assert!(positions_to_displacement_grid(&single_layer, &single_layer, 10.0).is_err());
    }

    #[test]
    fn test_invalid_step() {
        assert!(check_step(0.0).is_err());
        assert!(check_step(f64::NAN).is_err());
        assert!(check_step(1.0).is_ok());
    }
}
