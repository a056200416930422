//! pheno-datakit: the dataset/datatable transformation core for metabolic
//! and behavioral monitoring time series.
//!
//! Long-format observation tables (one row per animal per timestamp, one
//! column per measured variable) are owned by [`Datatable`]s inside a
//! [`Dataset`], which coordinates animal renames/exclusions, time trimming,
//! factor assignment and the current binning/outlier settings across every
//! owned table. Analysis code asks a datatable for a fresh table through the
//! filter → outlier → bin → group pipeline; the owned tables are only ever
//! changed by the explicit structural mutations.

pub mod aggregation;
pub mod dataset;
pub mod datatable;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod settings;

pub use aggregation::Aggregation;
pub use dataset::Dataset;
pub use datatable::{Datatable, QueryContext};
pub use error::PdkError;
pub use model::{Animal, DatasetMetadata, Factor, FactorLevel, Report, Value, Variable};
pub use settings::{
    BinningMode, BinningSettings, OutliersMode, OutliersSettings, SplitMode, TimeCyclesSettings,
    TimeIntervalsSettings, TimePhase,
};
