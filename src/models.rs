//! Static catalog of the supported chemical-transport models.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub const AIR_PRESSURE: &str = "AIR_PRESSURE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    CamsGlobal,
    CamsRegional,
    Silam,
    Emep,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::CamsGlobal,
        ModelKind::CamsRegional,
        ModelKind::Silam,
        ModelKind::Emep,
    ];

    pub fn spec(self) -> &'static ModelSpec {
        match self {
            ModelKind::CamsGlobal => &CAMS_GLOBAL,
            ModelKind::CamsRegional => &CAMS_REGIONAL,
            ModelKind::Silam => &SILAM,
            ModelKind::Emep => &EMEP,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::CamsGlobal => write!(f, "cams_global"),
            ModelKind::CamsRegional => write!(f, "cams_regional"),
            ModelKind::Silam => write!(f, "silam"),
            ModelKind::Emep => write!(f, "emep"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == normalized)
            .ok_or_else(|| FetchError::UnknownModel(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRule {
    /// `(end - start) / fcstep + 1`
    Uniform,
    /// 25 steps when the window touches the first forecast day (hour 0 is only
    /// published on day one), plus 24 per later day boundary crossed.
    DailyBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeciesSpec {
    pub key: &'static str,
    /// Variable name inside the downloaded files.
    pub varname: &'static str,
    /// Name the remote source uses for the species.
    pub urlname: &'static str,
    /// Surface-only fields have no vertical axis.
    pub surface_only: bool,
}

const fn species(key: &'static str, varname: &'static str, urlname: &'static str) -> SpeciesSpec {
    SpeciesSpec {
        key,
        varname,
        urlname,
        surface_only: false,
    }
}

const fn surface(key: &'static str, varname: &'static str, urlname: &'static str) -> SpeciesSpec {
    SpeciesSpec {
        key,
        varname,
        urlname,
        surface_only: true,
    }
}

/// Driver settings a model's upstream publishes under, used when the configuration
/// leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteDefaults {
    pub host: Option<&'static str>,
    pub path: Option<&'static str>,
    pub fnpattern: Option<&'static str>,
    pub manifest: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub fcstep_hours: i64,
    pub fcstart_offset_hours: i64,
    pub fcend_offset_hours: i64,
    pub step_rule: StepRule,
    pub time_axis: &'static str,
    /// Dimension the downloaded files are concatenated along.
    pub aggregate_dim: &'static str,
    /// Non-time dimensions in file order.
    pub dims: &'static [(&'static str, usize)],
    pub vertical_axis: &'static str,
    pub layer_type: &'static str,
    pub species: &'static [SpeciesSpec],
    pub remote: RemoteDefaults,
}

impl ModelSpec {
    pub fn fcstep(&self) -> TimeDelta {
        TimeDelta::hours(self.fcstep_hours)
    }

    pub fn fcstart_offset(&self) -> TimeDelta {
        TimeDelta::hours(self.fcstart_offset_hours)
    }

    pub fn fcend_offset(&self) -> TimeDelta {
        TimeDelta::hours(self.fcend_offset_hours)
    }

    pub fn species(&self, key: &str) -> Option<&'static SpeciesSpec> {
        self.species.iter().find(|spec| spec.key == key)
    }

    pub fn require_species(&self, key: &str) -> Result<&'static SpeciesSpec, FetchError> {
        self.species(key).ok_or_else(|| FetchError::UnknownSpecies {
            model: self.name.to_string(),
            species: key.to_string(),
        })
    }

    pub fn provides_air_pressure(&self) -> bool {
        self.species(AIR_PRESSURE).is_some()
    }

    pub fn dimension_template(&self, species: &SpeciesSpec) -> Vec<(&'static str, usize)> {
        self.dims
            .iter()
            .copied()
            .filter(|(name, _)| !(species.surface_only && *name == self.vertical_axis))
            .collect()
    }
}

pub static CAMS_GLOBAL: ModelSpec = ModelSpec {
    name: "CAMS_global",
    fcstep_hours: 3,
    fcstart_offset_hours: 0,
    fcend_offset_hours: 120,
    step_rule: StepRule::Uniform,
    time_axis: "t",
    aggregate_dim: "time",
    dims: &[("z", 60), ("y", 451), ("x", 900)],
    vertical_axis: "z",
    layer_type: "ml",
    species: &[
        species("CO", "co", "co"),
        species("O3", "go3", "go3"),
        species("HCHO", "hcho", "hcho"),
        species("HNO3", "hno3", "hno3"),
        species("NO", "no", "no"),
        species("NO2", "no2", "no2"),
        species("OH", "oh", "oh"),
        species("PANS", "pan", "pan"),
        species("SO2", "so2", "so2"),
        // log of surface pressure; the normalizer derives air pressure from it
        surface(AIR_PRESSURE, "lnsp", "lnsp"),
    ],
    remote: RemoteDefaults {
        host: Some("dissemination.ecmwf.int"),
        path: Some("/DATA/CAMS_NREALTIME/{fcinit:%Y%m%d%H}"),
        fnpattern: Some(r"z_cams_c_ecmf_{fcinit:%Y%m%d%H%M%S}_prod_fc_ml_(\d{{3}})_{species}.nc"),
        manifest: Some("z_cams_c_ecmf_{fcinit:%Y%m%d%H}0000_prod.manifest"),
    },
};

pub static CAMS_REGIONAL: ModelSpec = ModelSpec {
    name: "CAMS_regional",
    fcstep_hours: 1,
    fcstart_offset_hours: 0,
    fcend_offset_hours: 96,
    step_rule: StepRule::DailyBlocks,
    time_axis: "t",
    aggregate_dim: "time",
    dims: &[("z", 8), ("y", 400), ("x", 700)],
    vertical_axis: "z",
    layer_type: "al",
    species: &[
        species("CO", "co_conc", "CO"),
        species("NH3", "nh3_conc", "NH3"),
        species("NMVOC", "nmvoc_conc", "NMVOC"),
        species("NO2", "no2_conc", "NO2"),
        species("NO", "no_conc", "NO"),
        species("O3", "o3_conc", "O3"),
        species("PANS", "pans_conc", "PANS"),
        species("PM10", "pm10_conc", "PM10"),
        species("PM25", "pm2p5_conc", "PM25"),
        species("SO2", "so2_conc", "SO2"),
    ],
    remote: RemoteDefaults {
        host: None,
        path: None,
        fnpattern: None,
        manifest: None,
    },
};

pub static SILAM: ModelSpec = ModelSpec {
    name: "SILAM",
    fcstep_hours: 1,
    fcstart_offset_hours: 1,
    fcend_offset_hours: 120,
    step_rule: StepRule::Uniform,
    time_axis: "t",
    aggregate_dim: "time",
    dims: &[("z", 10), ("y", 420), ("x", 700)],
    vertical_axis: "z",
    layer_type: "al",
    species: &[
        species("CO", "cnc_CO_gas", "cnc_CO_gas"),
        species("NO", "cnc_NO_gas", "cnc_NO_gas"),
        species("NO2", "cnc_NO2_gas", "cnc_NO2_gas"),
        species("NMVOC", "cnc_NMVOC_gas", "cnc_NMVOC_gas"),
        species("O3", "cnc_O3_gas", "cnc_O3_gas"),
        species("PANS", "cnc_PAN_gas", "cnc_PAN_gas"),
        species("PM10", "cnc_PM10", "cnc_PM10"),
        species("SO2", "cnc_SO2_gas", "cnc_SO2_gas"),
        species(AIR_PRESSURE, "pressure", "pressure"),
        species("AIR_TEMPERATURE", "temperature", "temperature"),
    ],
    remote: RemoteDefaults {
        host: None,
        path: None,
        fnpattern: None,
        manifest: None,
    },
};

pub static EMEP: ModelSpec = ModelSpec {
    name: "EMEP",
    fcstep_hours: 1,
    fcstart_offset_hours: 1,
    fcend_offset_hours: 97,
    step_rule: StepRule::Uniform,
    time_axis: "t",
    aggregate_dim: "time",
    dims: &[("z", 20), ("y", 321), ("x", 281)],
    vertical_axis: "z",
    layer_type: "ml",
    species: &[
        species("O3", "D3_ug_O3", ""),
        species("NO2", "D3_ug_NO2", ""),
        species("PM25", "D3_ug_PM25_wet", ""),
        species("PM10", "D3_ug_PM10_wet", ""),
        species("NO", "D3_ug_NO", ""),
        species("SO2", "D3_ug_SO2", ""),
        species("CO", "D3_ug_CO", "co"),
        species("NH3", "D3_ug_NH3", ""),
        species("PANS", "D3_ug_PAN", ""),
        species("NMVOC", "D3_ug_NMVOC", ""),
        surface(AIR_PRESSURE, "PS", "pressure"),
    ],
    remote: RemoteDefaults {
        host: None,
        path: None,
        fnpattern: None,
        manifest: None,
    },
};
