mod common;

use approx::assert_relative_eq;
use common::*;
use ndarray::{Array2, Axis};
use shareloc::core::rectification::{
    compute_local_epipolar_line, compute_stereorectification_epipolar_grids,
    compute_strip_of_epipolar_grid, get_epipolar_extent, moving_along_axis,
    positions_to_displacement_grid, prepare_rectification, EpipolarAxis,
};
use shareloc::{coloc, Elevation, GeoError, Image};

#[test]
fn test_local_epipolar_line_is_horizontal() {
    init_logging();
    let (left, right) = stereo_pair();
    let points = Array2::from(vec![[20.0, 30.0, 0.0], [70.0, 5.0, 0.0]]);

    let (start, end) =
        compute_local_epipolar_line(&left, &right, &points, Elevation::Constant(0.0), 50.0).unwrap();
    assert_eq!(start.dim(), (2, 3));
    for i in 0..2 {
        assert_relative_eq!(start[[i, 0]], points[[i, 0]], epsilon = 1e-9);
        assert_relative_eq!(end[[i, 0]], points[[i, 0]], epsilon = 1e-9);
        assert_relative_eq!(start[[i, 1]], points[[i, 1]] - 0.5, epsilon = 1e-9);
        assert_relative_eq!(end[[i, 1]], points[[i, 1]] + 0.5, epsilon = 1e-9);
        assert_eq!(start[[i, 2]], -50.0);
        assert_eq!(end[[i, 2]], 50.0);
    }
}

#[test]
fn test_prepare_rectification() {
    let (left, right) = stereo_pair();
    let image = Image::sensor(100, 100);

    let geometry =
        prepare_rectification(&image, &left, &right, Elevation::Constant(0.0), 10.0, 50.0).unwrap();
    assert_eq!(geometry.grid_pixel_size, [10.0, 10.0]);
    assert_eq!(geometry.rectified_image_size, [100, 100]);
    assert_eq!(geometry.grid_size, [12, 12]);

    let footprint = &geometry.footprint;
    assert_eq!(footprint.dim(), (4, 3));
    // upper left
    assert_relative_eq!(footprint[[0, 0]], 0.5, epsilon = 1e-9);
    assert_relative_eq!(footprint[[0, 1]], 0.5, epsilon = 1e-9);
    assert_relative_eq!(footprint[[0, 2]], 0.0, epsilon = 1e-9);
    // lower right, one step beyond the image
    assert_relative_eq!(footprint[[2, 0]], 110.5, epsilon = 1e-9);
    assert_relative_eq!(footprint[[2, 1]], 110.5, epsilon = 1e-9);
}

#[test]
fn test_prepare_rectification_rejects_bad_step() {
    let (left, right) = stereo_pair();
    let image = Image::sensor(100, 100);
    assert!(matches!(
        prepare_rectification(&image, &left, &right, Elevation::Constant(0.0), 0.0, 50.0),
        Err(GeoError::InvalidInput(_))
    ));
}

#[test]
fn test_epipolar_extent() {
    let (left, right) = stereo_pair();
    let image = Image::sensor(100, 100);

    let flat = Elevation::Constant(0.0);
    let extent = get_epipolar_extent(&image, &left, &right, flat, 10.0, 50.0, 0.0).unwrap();
    let expected = [42.9879, 6.9901, 43.0099, 7.0121];
    for (value, expected) in extent.iter().zip(expected.iter()) {
        assert_relative_eq!(*value, *expected, epsilon = 1e-9);
    }

    let widened = get_epipolar_extent(&image, &left, &right, flat, 10.0, 50.0, 0.5).unwrap();
    assert_relative_eq!(widened[0], extent[0] - 0.5, epsilon = 1e-12);
    assert_relative_eq!(widened[3], extent[3] + 0.5, epsilon = 1e-12);
}

#[test]
fn test_moving_along_axis() {
    let (left, right) = stereo_pair();
    let current = Array2::from(vec![[10.0, 10.0, 0.0]]);
    let angles = ndarray::array![0.0];

    let (next_left, next_right) = moving_along_axis(
        &left,
        &right,
        &current,
        1.0,
        Elevation::Constant(0.0),
        10.0,
        &angles,
        EpipolarAxis::AlongLine,
    )
    .unwrap();
    assert_relative_eq!(next_left[[0, 0]], 10.0, epsilon = 1e-12);
    assert_relative_eq!(next_left[[0, 1]], 20.0, epsilon = 1e-12);
    assert_relative_eq!(next_right[[0, 1]], 20.0, epsilon = 1e-9);

    let (next_line, _) = moving_along_axis(
        &left,
        &right,
        &current,
        1.0,
        Elevation::Constant(0.0),
        10.0,
        &angles,
        EpipolarAxis::NextLine,
    )
    .unwrap();
    assert_relative_eq!(next_line[[0, 0]], 20.0, epsilon = 1e-12);
    assert_relative_eq!(next_line[[0, 1]], 10.0, epsilon = 1e-12);

    let too_many = ndarray::array![0.0, 0.0];
    assert!(moving_along_axis(
        &left,
        &right,
        &current,
        1.0,
        Elevation::Constant(0.0),
        10.0,
        &too_many,
        EpipolarAxis::AlongLine,
    )
    .is_err());
}

#[test]
fn test_stereorectification_grids() {
    init_logging();
    let (left, right) = stereo_pair();
    let image = Image::sensor(100, 100);

    let flat = Elevation::Constant(0.0);
    let grids =
        compute_stereorectification_epipolar_grids(&image, &left, &right, flat, 10.0, 50.0).unwrap();

    assert_eq!((grids.nb_rows, grids.nb_cols), (100, 100));
    assert_eq!(grids.left.data.dim(), (2, 12, 12));
    assert_eq!(grids.right.data.dim(), (2, 12, 12));
    assert_eq!(grids.left.transform.top_left_x, -5.0);
    assert_eq!(grids.left.transform.pixel_width, 10.0);

    // both images share the epipolar geometry shifted by half a pixel
    for grid in [&grids.left, &grids.right] {
        for value in grid.data.iter() {
            assert_relative_eq!(*value, 0.5, epsilon = 1e-6);
        }
    }
    assert_relative_eq!(grids.mean_baseline_ratio, 0.01, epsilon = 1e-9);
}

#[test]
fn test_strip_walks_match_full_grids() {
    init_logging();
    let (left, right) = stereo_pair();
    let image = Image::sensor(100, 100);
    let elevation = Elevation::Constant(0.0);

    let grids = compute_stereorectification_epipolar_grids(&image, &left, &right, elevation, 10.0, 50.0)
        .unwrap();

    let start_left = Array2::from(vec![[0.5, 0.5, 0.0]]);
    let sensor = coloc(&left, &right, &[0.5], &[0.5], elevation, None, None, false).unwrap();
    let start_right = Array2::from(vec![[sensor.row[0], sensor.col[0], sensor.alt[0]]]);

    // first grid column, one angle per epipolar line
    let column = compute_strip_of_epipolar_grid(
        &left,
        &right,
        &start_left,
        &start_right,
        12,
        1.0,
        EpipolarAxis::NextLine,
        10.0,
        elevation,
        50.0,
        None,
    )
    .unwrap();
    assert_eq!(column.left.dim(), (3, 12, 1));
    assert_eq!(column.alphas.dim(), (12, 1));
    for k in 0..12 {
        assert_relative_eq!(column.left[[0, k, 0]], 0.5 + 10.0 * k as f64, epsilon = 1e-6);
        assert_relative_eq!(column.left[[1, k, 0]], 0.5, epsilon = 1e-6);
        assert_relative_eq!(column.alphas[[k, 0]], 0.0, epsilon = 1e-9);
    }
    assert_relative_eq!(column.mean_baseline_ratio, 0.01, epsilon = 1e-9);

    // every line walked with the angle found at its start
    let line_alphas = column.alphas.column(0).to_owned();
    let lines = compute_strip_of_epipolar_grid(
        &left,
        &right,
        &column.left.index_axis(Axis(2), 0).t().to_owned(),
        &column.right.index_axis(Axis(2), 0).t().to_owned(),
        12,
        1.0,
        EpipolarAxis::AlongLine,
        10.0,
        elevation,
        50.0,
        Some(&line_alphas),
    )
    .unwrap();
    assert_eq!(lines.left.dim(), (3, 12, 12));
    assert_relative_eq!(lines.mean_baseline_ratio, grids.mean_baseline_ratio, epsilon = 1e-9);

    let (left_grid, right_grid) =
        positions_to_displacement_grid(&lines.left, &lines.right, 10.0).unwrap();
    assert_eq!(left_grid.transform, grids.left.transform);
    for (value, expected) in left_grid.data.iter().zip(grids.left.data.iter()) {
        assert_relative_eq!(*value, *expected, epsilon = 1e-6);
    }
    for (value, expected) in right_grid.data.iter().zip(grids.right.data.iter()) {
        assert_relative_eq!(*value, *expected, epsilon = 1e-6);
    }
}

#[test]
fn test_strip_rejects_mismatched_angles() {
    let (left, right) = stereo_pair();
    let start = Array2::from(vec![[10.0, 10.0, 0.0], [20.0, 10.0, 0.0]]);
    let angles = ndarray::array![0.0];
    assert!(matches!(
        compute_strip_of_epipolar_grid(
            &left,
            &right,
            &start,
            &start,
            4,
            1.0,
            EpipolarAxis::AlongLine,
            10.0,
            Elevation::Constant(0.0),
            50.0,
            Some(&angles),
        ),
        Err(GeoError::LengthMismatch { .. })
    ));
}
