use std::path::PathBuf;

use tracing::debug;

use crate::domain::ForecastWindow;
use crate::error::FetchError;
use crate::models::{ModelSpec, SpeciesSpec};
use crate::timegrid::expected_steps;

pub trait DatasetInspector: Send + Sync {
    fn variable_shape(
        &self,
        files: &[PathBuf],
        variable: &str,
        aggregate_dim: &str,
    ) -> Result<Vec<usize>, FetchError>;
}

/// Expected `(axis, size)` pairs, time first.
pub fn expected_shape(
    model: &ModelSpec,
    species: &SpeciesSpec,
    window: &ForecastWindow,
) -> Vec<(String, usize)> {
    let mut shape = vec![(model.time_axis.to_string(), expected_steps(model, window))];
    shape.extend(
        model
            .dimension_template(species)
            .into_iter()
            .map(|(name, size)| (name.to_string(), size)),
    );
    shape
}

pub fn validate_dimensions<I>(
    inspector: &I,
    model: &ModelSpec,
    species: &SpeciesSpec,
    files: &[PathBuf],
    window: &ForecastWindow,
) -> Result<(), FetchError>
where
    I: DatasetInspector + ?Sized,
{
    let expected = expected_shape(model, species, window);
    if files.is_empty() {
        return Err(FetchError::DimensionMismatch {
            axis: model.time_axis.to_string(),
            observed: 0,
            expected: expected[0].1,
        });
    }

    let observed = inspector.variable_shape(files, species.varname, model.aggregate_dim)?;
    debug!(variable = species.varname, ?observed, "inspected staged files");

    for (index, (axis, size)) in expected.iter().enumerate() {
        let actual = observed.get(index).copied().unwrap_or(0);
        if actual != *size {
            return Err(FetchError::DimensionMismatch {
                axis: axis.clone(),
                observed: actual,
                expected: *size,
            });
        }
    }
    if observed.len() > expected.len() {
        return Err(FetchError::DimensionMismatch {
            axis: format!("#{}", expected.len()),
            observed: observed[expected.len()],
            expected: 0,
        });
    }
    Ok(())
}

#[cfg(feature = "netcdf")]
pub use self::netcdf_backend::NetcdfInspector;

#[cfg(feature = "netcdf")]
mod netcdf_backend {
    use std::path::{Path, PathBuf};

    use super::DatasetInspector;
    use crate::error::FetchError;

    /// Reads variable shapes through libnetcdf; the aggregate dimension is summed
    /// over all files, the others must agree between files.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NetcdfInspector;

    impl NetcdfInspector {
        fn file_shape(path: &Path, variable: &str) -> Result<Vec<(String, usize)>, FetchError> {
            let file = netcdf::open(path)
                .map_err(|err| FetchError::Dataset(format!("{}: {err}", path.display())))?;
            let var = file.variable(variable).ok_or_else(|| {
                FetchError::Dataset(format!("{}: no variable {variable}", path.display()))
            })?;
            Ok(var
                .dimensions()
                .iter()
                .map(|dim| (dim.name(), dim.len()))
                .collect())
        }
    }

    impl DatasetInspector for NetcdfInspector {
        fn variable_shape(
            &self,
            files: &[PathBuf],
            variable: &str,
            aggregate_dim: &str,
        ) -> Result<Vec<usize>, FetchError> {
            let mut combined: Vec<(String, usize)> = Vec::new();
            for path in files {
                let shape = Self::file_shape(path, variable)?;
                if combined.is_empty() {
                    combined = shape;
                    continue;
                }
                if shape.len() != combined.len() {
                    return Err(FetchError::Dataset(format!(
                        "{}: {variable} has {} dimensions, expected {}",
                        path.display(),
                        shape.len(),
                        combined.len()
                    )));
                }
                for ((name, total), (other, len)) in combined.iter_mut().zip(shape) {
                    if *name == aggregate_dim {
                        *total += len;
                    } else if *name != other || *total != len {
                        return Err(FetchError::Dataset(format!(
                            "{}: dimension {other}={len} does not line up with {name}={total}",
                            path.display()
                        )));
                    }
                }
            }
            Ok(combined.into_iter().map(|(_, len)| len).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::models::CAMS_GLOBAL;

    struct FixedShape(Vec<usize>);

    impl DatasetInspector for FixedShape {
        fn variable_shape(&self, _: &[PathBuf], _: &str, _: &str) -> Result<Vec<usize>, FetchError> {
            Ok(self.0.clone())
        }
    }

    fn window() -> ForecastWindow {
        let init = Utc.with_ymd_and_hms(2017, 2, 15, 0, 0, 0).unwrap();
        ForecastWindow::new(init, init, init + TimeDelta::hours(6)).unwrap()
    }

    #[test]
    fn missing_axis_is_a_mismatch() {
        let no2 = CAMS_GLOBAL.species("NO2").unwrap();
        let err = validate_dimensions(
            &FixedShape(vec![3, 60, 451]),
            &CAMS_GLOBAL,
            no2,
            &[PathBuf::from("a.nc")],
            &window(),
        )
        .unwrap_err();
        assert_matches!(
            err,
            FetchError::DimensionMismatch { ref axis, observed: 0, expected: 900 } if axis == "x"
        );
    }

    #[test]
    fn extra_axis_is_a_mismatch() {
        let no2 = CAMS_GLOBAL.species("NO2").unwrap();
        let err = validate_dimensions(
            &FixedShape(vec![3, 60, 451, 900, 2]),
            &CAMS_GLOBAL,
            no2,
            &[PathBuf::from("a.nc")],
            &window(),
        )
        .unwrap_err();
        assert_matches!(err, FetchError::DimensionMismatch { observed: 2, .. });
    }

    #[test]
    fn surface_species_matches_without_levels() {
        let pressure = CAMS_GLOBAL.species("AIR_PRESSURE").unwrap();
        validate_dimensions(
            &FixedShape(vec![3, 451, 900]),
            &CAMS_GLOBAL,
            pressure,
            &[PathBuf::from("a.nc")],
            &window(),
        )
        .unwrap();
    }
}
