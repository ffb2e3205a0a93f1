use crate::core::rectification::EpipolarGrid;
use crate::types::GeoResult;
use gdal::raster::Buffer;
use gdal::DriverManager;
use std::path::Path;

/// Write a displacement grid as a 2-band float64 GeoTIFF
///
/// With `xy_convention` band 1 holds the column displacement and band 2 the
/// row displacement, otherwise the order is reversed.
pub fn write_epipolar_grid<P: AsRef<Path>>(
    grid: &EpipolarGrid,
    output_path: P,
    xy_convention: bool,
) -> GeoResult<()> {
    log::info!("Saving epipolar grid as GeoTIFF: {}", output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = (grid.nb_rows(), grid.nb_cols());

    let mut dataset = driver.create_with_band_type::<f64, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        2,
    )?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;

    // data[0] is the row displacement, data[1] the column one
    let band_order: [usize; 2] = if xy_convention { [1, 0] } else { [0, 1] };

    for (band_index, &layer) in band_order.iter().enumerate() {
        let mut rasterband = dataset.rasterband(band_index as isize + 1)?;
        let flat_data: Vec<f64> = grid
            .data
            .index_axis(ndarray::Axis(0), layer)
            .iter()
            .cloned()
            .collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
    }

    Ok(())
}
