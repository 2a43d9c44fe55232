use crate::types::{
    BandStack, CanopyError, CanopyResult, GeoTransform, RasterTile, SampleType, TileGrid,
};
use gdal::raster::{Buffer, GdalDataType, GdalType, ResampleAlg};
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3, Axis};
use num_traits::NumCast;
use std::path::Path;

impl SampleType {
    fn from_gdal(data_type: GdalDataType) -> Self {
        match data_type {
            GdalDataType::UInt8 => SampleType::Byte,
            GdalDataType::UInt16 => SampleType::UInt16,
            GdalDataType::Int16 => SampleType::Int16,
            _ => SampleType::Float32,
        }
    }

    fn is_integer(&self) -> bool {
        !matches!(self, SampleType::Float32)
    }
}

/// GDAL-backed raster reader
pub struct RasterReader;

impl RasterReader {
    /// Read only the pixel grid (size, transform, CRS) of a raster
    pub fn read_grid<P: AsRef<Path>>(path: P) -> CanopyResult<TileGrid> {
        let dataset = Dataset::open(path.as_ref())?;
        Self::grid_of(&dataset)
    }

    fn grid_of(dataset: &Dataset) -> CanopyResult<TileGrid> {
        let (width, height) = dataset.raster_size();
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        Ok(TileGrid {
            width,
            height,
            transform,
            crs: dataset.projection(),
        })
    }

    /// Read all bands at full resolution
    pub fn read<P: AsRef<Path>>(path: P) -> CanopyResult<RasterTile> {
        Self::read_downsampled(path, 1)
    }

    /// Read all bands at `1 / factor` resolution with GDAL's averaging
    /// resampler. The output size is the integer quotient of the source
    /// size and the pixel size is scaled by exactly `factor`.
    pub fn read_downsampled<P: AsRef<Path>>(path: P, factor: usize) -> CanopyResult<RasterTile> {
        if factor == 0 {
            return Err(CanopyError::InvalidParameter(
                "Resample factor must be at least 1".to_string(),
            ));
        }

        log::debug!("Reading {} at 1/{} resolution", path.as_ref().display(), factor);

        let dataset = Dataset::open(path.as_ref())?;
        let grid = Self::grid_of(&dataset)?;
        let out_width = grid.width / factor;
        let out_height = grid.height / factor;
        if out_width == 0 || out_height == 0 {
            return Err(CanopyError::InvalidParameter(format!(
                "Resample factor {} too large for {}x{} raster",
                factor, grid.width, grid.height
            )));
        }

        let band_count = dataset.raster_count() as usize;
        let mut data = Array3::<f32>::zeros((band_count, out_height, out_width));
        let resampling = if factor > 1 { Some(ResampleAlg::Average) } else { None };
        let mut nodata = None;
        let mut sample_type = SampleType::Float32;

        for band_index in 0..band_count {
            let band = dataset.rasterband((band_index + 1) as isize)?;
            let buffer = band.read_as::<f32>(
                (0, 0),
                (grid.width, grid.height),
                (out_width, out_height),
                resampling,
            )?;
            let plane = Array2::from_shape_vec((out_height, out_width), buffer.data)
                .map_err(|e| CanopyError::Processing(format!("Failed to reshape band data: {}", e)))?;
            data.index_axis_mut(Axis(0), band_index).assign(&plane);

            if band_index == 0 {
                nodata = band.no_data_value();
                sample_type = SampleType::from_gdal(band.band_type());
            }
        }

        Ok(RasterTile {
            data,
            transform: grid.transform.scaled(factor),
            crs: grid.crs,
            nodata,
            sample_type,
        })
    }

    /// Read the first band as 8-bit labels
    pub fn read_labels<P: AsRef<Path>>(path: P) -> CanopyResult<Array2<u8>> {
        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let band = dataset.rasterband(1)?;
        let buffer = band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
        Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| CanopyError::Processing(format!("Failed to reshape label data: {}", e)))
    }
}

/// GeoTIFF writer
pub struct RasterWriter;

impl RasterWriter {
    /// Write a multi-band tile, keeping its sample type
    pub fn write_tile<P: AsRef<Path>>(tile: &RasterTile, output_path: P) -> CanopyResult<()> {
        let round = tile.sample_type.is_integer();
        match tile.sample_type {
            SampleType::Byte => Self::write_bands::<u8>(tile, round, output_path.as_ref()),
            SampleType::UInt16 => Self::write_bands::<u16>(tile, round, output_path.as_ref()),
            SampleType::Int16 => Self::write_bands::<i16>(tile, round, output_path.as_ref()),
            SampleType::Float32 => Self::write_bands::<f32>(tile, round, output_path.as_ref()),
        }
    }

    fn write_bands<T>(tile: &RasterTile, round: bool, output_path: &Path) -> CanopyResult<()>
    where
        T: GdalType + NumCast + Copy + Default,
    {
        let dataset = Self::create::<T>(
            output_path,
            &tile.grid(),
            tile.bands(),
        )?;

        let (width, height) = (tile.width(), tile.height());
        for band_index in 0..tile.bands() {
            let plane = Self::cast_plane::<T>(&tile.data, band_index, round);
            let mut rasterband = dataset.rasterband((band_index + 1) as isize)?;
            let buffer = Buffer::new((width, height), plane);
            rasterband.write((0, 0), (width, height), &buffer)?;
            if let Some(nodata) = tile.nodata {
                rasterband.set_no_data_value(Some(nodata))?;
            }
        }

        Ok(())
    }

    fn cast_plane<T: NumCast + Default>(data: &BandStack, band_index: usize, round: bool) -> Vec<T> {
        data.index_axis(Axis(0), band_index)
            .iter()
            .map(|&value| {
                let value = if round { value.round() } else { value };
                T::from(value).unwrap_or_default()
            })
            .collect()
    }

    /// Write a single-band 8-bit raster on `grid` with an explicit nodata marker
    pub fn write_labels<P: AsRef<Path>>(
        labels: &Array2<u8>,
        grid: &TileGrid,
        nodata: u8,
        output_path: P,
    ) -> CanopyResult<()> {
        let (height, width) = labels.dim();
        if (width, height) != (grid.width, grid.height) {
            return Err(CanopyError::DimensionMismatch(format!(
                "Label array {}x{} does not match grid {}x{}",
                width, height, grid.width, grid.height
            )));
        }

        let dataset = Self::create::<u8>(output_path.as_ref(), grid, 1)?;
        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<u8> = labels.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(nodata as f64))?;
        Ok(())
    }

    fn create<T: GdalType>(output_path: &Path, grid: &TileGrid, bands: usize) -> CanopyResult<Dataset> {
        log::debug!("Writing {}x{}x{} GeoTIFF: {}", grid.width, grid.height, bands, output_path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            output_path,
            grid.width as isize,
            grid.height as isize,
            bands as isize,
        )?;
        dataset.set_geo_transform(&grid.transform.to_gdal())?;
        if !grid.crs.is_empty() {
            dataset.set_projection(&grid.crs)?;
        }
        Ok(dataset)
    }
}
