//! ESRI ASCII grids.
//!
//! ```text
//! ncols        4
//! nrows        3
//! xllcorner    950000.0
//! yllcorner    6430000.0
//! cellsize     25.0
//! NODATA_value -9999
//! ...rows, north first...
//! ```

use std::fmt::Write as _;
use std::path::Path;

use ndarray::Array2;

use crate::config::THICKNESS_NOISE_CEILING_M;
use crate::error::{FormatError, GlacierError};
use crate::grid::{ElevationField, RasterMeta};

const DEFAULT_NO_DATA: f64 = -9999.0;

pub fn read_ascii_grid(path: &Path) -> Result<(Array2<f64>, RasterMeta), GlacierError> {
    if !path.exists() {
        return Err(GlacierError::MissingRaster(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| GlacierError::BadRaster {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_ascii_grid(&text).map_err(|source| GlacierError::MalformedRaster {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_ascii_grid(text: &str) -> Result<(Array2<f64>, RasterMeta), FormatError> {
    let mut ncols = None;
    let mut nrows = None;
    let mut xll = None;
    let mut yll = None;
    let mut centered = false;
    let mut cellsize = None;
    let mut no_data = DEFAULT_NO_DATA;

    let mut lines = text.lines().filter(|l| !l.trim().is_empty()).peekable();
    while let Some(line) = lines.peek() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            break;
        };
        if key.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.') {
            break;
        }
        let number = |v: &str| {
            v.parse::<f64>().map_err(|_| FormatError::HeaderValue {
                key: key.to_string(),
                value: v.to_string(),
            })
        };
        match key.to_ascii_lowercase().as_str() {
            "ncols" => ncols = Some(number(value)? as usize),
            "nrows" => nrows = Some(number(value)? as usize),
            "xllcorner" => xll = Some(number(value)?),
            "yllcorner" => yll = Some(number(value)?),
            "xllcenter" => {
                xll = Some(number(value)?);
                centered = true;
            }
            "yllcenter" => {
                yll = Some(number(value)?);
                centered = true;
            }
            "cellsize" => cellsize = Some(number(value)?),
            "nodata_value" => no_data = number(value)?,
            other => return Err(FormatError::UnknownHeader(other.to_string())),
        }
        lines.next();
    }

    let (Some(ncols), Some(nrows), Some(mut xll), Some(mut yll), Some(cellsize)) = (ncols, nrows, xll, yll, cellsize)
    else {
        return Err(FormatError::IncompleteHeader);
    };
    if centered {
        xll -= cellsize / 2.0;
        yll -= cellsize / 2.0;
    }

    let values = lines
        .flat_map(str::split_whitespace)
        .map(|v| v.parse::<f64>().map_err(|_| FormatError::CellValue(v.to_string())))
        .collect::<Result<Vec<f64>, FormatError>>()?;
    let expected = nrows * ncols;
    let found = values.len();
    let grid = Array2::from_shape_vec((nrows, ncols), values).map_err(|_| FormatError::CellCount { expected, found })?;
    let meta = RasterMeta {
        x_origin: xll,
        y_origin: yll + nrows as f64 * cellsize,
        pixel_width: cellsize,
        pixel_height: -cellsize,
        no_data,
    };
    Ok((grid, meta))
}

pub fn format_ascii_grid(grid: &Array2<f64>, meta: &RasterMeta) -> String {
    let (rows, cols) = grid.dim();
    let mut out = String::new();
    let _ = writeln!(out, "ncols        {cols}");
    let _ = writeln!(out, "nrows        {rows}");
    let _ = writeln!(out, "xllcorner    {}", meta.x_origin);
    let _ = writeln!(out, "yllcorner    {}", meta.y_origin + rows as f64 * meta.pixel_height);
    let _ = writeln!(out, "cellsize     {}", meta.pixel_width);
    let _ = writeln!(out, "NODATA_value {}", meta.no_data);
    for row in grid.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{v}")).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

/// Read `<id>_thickness.asc` and `<id>_dem.asc` and prepare the initial field.
///
/// The thickness grid's corner pixel marks no-data. Thickness is scaled by
/// `thickness_factor`; values above the noise ceiling (scaled too) are dropped.
/// The surface is rounded to whole metres.
pub fn load_glacier_field(dir: &Path, glacier_id: i64, thickness_factor: f64) -> Result<ElevationField, GlacierError> {
    let (thickness, meta) = read_ascii_grid(&dir.join(format!("{glacier_id}_thickness.asc")))?;
    let (dem, _) = read_ascii_grid(&dir.join(format!("{glacier_id}_dem.asc")))?;
    if thickness.dim() != dem.dim() {
        return Err(GlacierError::Misaligned {
            thickness: thickness.dim(),
            dem: dem.dim(),
        });
    }
    prepare_field(thickness, dem, meta, thickness_factor)
}

pub fn prepare_field(
    thickness: Array2<f64>,
    dem: Array2<f64>,
    meta: RasterMeta,
    thickness_factor: f64,
) -> Result<ElevationField, GlacierError> {
    let corner = thickness.get((0, 0)).copied().ok_or(GlacierError::NoIce)?;
    let thickness = thickness.mapv(|t| if t == corner || !t.is_finite() { f64::NAN } else { t });
    if !thickness.iter().any(|&t| t.is_finite() && t != 0.0) {
        return Err(GlacierError::NoIce);
    }

    let ceiling = THICKNESS_NOISE_CEILING_M * thickness_factor;
    let thickness = thickness.mapv(|t| {
        let t = t * thickness_factor;
        if t > ceiling {
            0.0
        } else {
            t
        }
    });
    let surface = dem.mapv(f64::round);
    ElevationField::new(thickness, surface, meta)
}
