use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDateTime, TimeDelta};
use polars::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::error::PdkError;
use crate::model::{Animal, Factor, Variable};
use crate::pipeline;
use crate::schema::{columns, split};
use crate::settings::{BinningSettings, OutliersMode, OutliersSettings, SplitMode};

/// Read-only view of the owning dataset's state a query needs: the animal
/// map for filtering, the factor set for column selection, and the current
/// binning/outlier settings. Borrowed per call, so the datatable never holds
/// a back-pointer to its dataset.
pub struct QueryContext<'a> {
    pub animals: &'a BTreeMap<String, Animal>,
    pub factors: &'a BTreeMap<String, Factor>,
    pub binning: &'a BinningSettings,
    pub outliers: &'a OutliersSettings,
}

/// One observation table and its derived, factor-annotated working copy.
///
/// `original` is the authoritative source, only rewritten by the explicit
/// structural mutations. `active` is a cache (`original` + factor columns)
/// rebuilt exclusively through `refresh_active`; queries read `active` and
/// always return fresh tables.
#[derive(Debug, Clone)]
pub struct Datatable {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub variables: BTreeMap<String, Variable>,
    original: DataFrame,
    active: DataFrame,
    pub sampling_interval: Option<TimeDelta>,
}

impl Datatable {
    /// Wrap an imported observation table.
    ///
    /// Required columns: Animal, DateTime, Timedelta. `active` starts as a
    /// bare copy; the owning dataset refreshes it on adoption.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        original: DataFrame,
        variables: BTreeMap<String, Variable>,
        sampling_interval: Option<TimeDelta>,
    ) -> Result<Self, PdkError> {
        Self::require_columns(&original, &columns::DEFAULT)?;
        let active = original.clone();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            variables,
            original,
            active,
            sampling_interval,
        })
    }

    pub fn original(&self) -> &DataFrame {
        &self.original
    }

    pub fn active(&self) -> &DataFrame {
        &self.active
    }

    fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), PdkError> {
        for &name in required {
            if df.column(name).is_err() {
                return Err(PdkError::MissingColumn(name.to_string()));
            }
        }
        Ok(())
    }

    // ── Query surface ───────────────────────────────────────────────────────

    /// Project `active` to `columns`, drop disabled animals, then null
    /// out-of-band cells of the queried variables when outlier removal is on.
    pub fn get_filtered_df(
        &self,
        selection: &[String],
        ctx: &QueryContext,
    ) -> Result<DataFrame, PdkError> {
        let schema = self.active.schema();
        for name in selection {
            if !schema.contains(name.as_str()) {
                return Err(PdkError::VariableNotFound(name.clone()));
            }
        }
        // The animal filter downstream needs the Animal column in scope.
        if !selection.iter().any(|c| c == columns::ANIMAL) {
            return Err(PdkError::MissingColumn(columns::ANIMAL.to_string()));
        }

        let exprs: Vec<Expr> = selection.iter().map(|c| col(c.as_str())).collect();
        let df = self.active.clone().lazy().select(exprs).collect()?;
        let df = pipeline::filter_enabled_animals(df, ctx.animals)?;

        if ctx.outliers.mode == OutliersMode::Remove {
            let in_scope: Vec<String> = selection
                .iter()
                .filter(|c| self.variables.contains_key(*c))
                .cloned()
                .collect();
            return pipeline::remove_outliers(df, ctx.outliers, &in_scope);
        }
        Ok(df)
    }

    /// The full pipeline for a set of variables: filter, bin (when applied),
    /// group by split mode, optionally drop rows with null variable values.
    pub fn get_preprocessed_df(
        &self,
        variables: &[String],
        split_mode: SplitMode,
        factor_name: Option<&str>,
        dropna: bool,
        ctx: &QueryContext,
    ) -> Result<DataFrame, PdkError> {
        for name in variables {
            if !self.variables.contains_key(name) {
                return Err(PdkError::VariableNotFound(name.clone()));
            }
        }

        let mut selection = self.structural_columns(ctx);
        selection.extend(variables.iter().cloned());
        self.run_pipeline(&selection, variables, split_mode, factor_name, dropna, ctx)
    }

    /// Same pipeline with an explicit column list; the variable set is the
    /// subset of `selection` that names a known variable.
    pub fn get_preprocessed_df_columns(
        &self,
        selection: &[String],
        split_mode: SplitMode,
        factor_name: Option<&str>,
        dropna: bool,
        ctx: &QueryContext,
    ) -> Result<DataFrame, PdkError> {
        let variables: Vec<String> = selection
            .iter()
            .filter(|c| self.variables.contains_key(*c))
            .cloned()
            .collect();

        let mut full = self.structural_columns(ctx);
        for name in selection {
            if !full.contains(name) {
                full.push(name.clone());
            }
        }
        self.run_pipeline(&full, &variables, split_mode, factor_name, dropna, ctx)
    }

    fn run_pipeline(
        &self,
        selection: &[String],
        variables: &[String],
        split_mode: SplitMode,
        factor_name: Option<&str>,
        dropna: bool,
        ctx: &QueryContext,
    ) -> Result<DataFrame, PdkError> {
        let mut df = self.get_filtered_df(selection, ctx)?;
        if ctx.binning.apply {
            df = pipeline::apply_binning(df, ctx.binning, &self.variables)?;
        }
        df = pipeline::split_by_mode(df, split_mode, factor_name, &self.variables)?;

        if dropna && !variables.is_empty() {
            let mut keep = lit(true);
            for name in variables {
                keep = keep.and(col(name.as_str()).is_not_null());
            }
            df = df.lazy().filter(keep).collect()?;
        }
        Ok(df)
    }

    /// Default columns plus whichever of Bin/Run and the dataset's factor
    /// columns the active table currently carries.
    fn structural_columns(&self, ctx: &QueryContext) -> Vec<String> {
        let schema = self.active.schema();
        let mut out: Vec<String> = columns::DEFAULT.iter().map(|c| c.to_string()).collect();
        for name in [columns::BIN, columns::RUN] {
            if schema.contains(name) {
                out.push(name.to_string());
            }
        }
        for name in ctx.factors.keys() {
            if schema.contains(name.as_str()) {
                out.push(name.clone());
            }
        }
        out
    }

    /// Legal grouping keys in the current state.
    pub fn get_group_by_columns(&self, ctx: &QueryContext) -> Vec<String> {
        let schema = self.active.schema();
        let mut out = vec![columns::ANIMAL.to_string()];
        if ctx.binning.apply || schema.contains(columns::BIN) {
            out.push(split::TOTAL.to_string());
            out.extend(ctx.factors.keys().cloned());
        }
        if schema.contains(columns::RUN) {
            out.push(columns::RUN.to_string());
        }
        out
    }

    // ── Structural mutations ────────────────────────────────────────────────

    /// Destructively re-sample `original` to a new fixed interval: per-animal
    /// windows over `Timedelta`, each variable collapsed with its configured
    /// aggregation, `Bin`/`Timedelta` rebuilt from the window index, output
    /// sorted by `(Timedelta, Animal)`.
    pub fn resample(
        &mut self,
        interval: TimeDelta,
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        let delta_us = interval
            .num_microseconds()
            .filter(|us| *us > 0)
            .ok_or_else(|| {
                PdkError::Validation("Resampling interval must be positive".to_string())
            })?;

        let window = (col(columns::TIMEDELTA)
            .dt()
            .total_microseconds()
            .cast(DataType::Float64)
            / lit(delta_us as f64))
        .floor()
        .cast(DataType::Int64)
        .alias(columns::BIN);

        let mut keys = vec![col(columns::ANIMAL)];
        if self.original.schema().contains(columns::RUN) {
            keys.push(col(columns::RUN));
        }
        keys.push(col(columns::BIN));

        let mut aggs: Vec<Expr> = Vec::new();
        for name in self.original.get_column_names_str() {
            if name == columns::ANIMAL
                || name == columns::RUN
                || name == columns::BIN
                || name == columns::TIMEDELTA
            {
                continue;
            }
            match self.variables.get(name) {
                Some(var) => aggs.push(var.aggregation.expr(name)),
                None => aggs.push(col(name).first()),
            }
        }

        self.original = self
            .original
            .clone()
            .lazy()
            .with_columns([window])
            .group_by_stable(keys)
            .agg(aggs)
            .with_columns([(col(columns::BIN) * lit(delta_us))
                .cast(DataType::Duration(TimeUnit::Microseconds))
                .alias(columns::TIMEDELTA)])
            .filter(col(columns::DATE_TIME).is_not_null())
            .sort_by_exprs(
                [col(columns::TIMEDELTA), col(columns::ANIMAL)],
                SortMultipleOptions::default(),
            )
            .collect()?;

        self.sampling_interval = Some(interval);
        debug!(table = %self.name, interval_us = delta_us, "resampled");
        self.refresh_active(factors)
    }

    /// Drop all rows of the given animals and re-zero per-run elapsed time.
    pub fn exclude_animals(
        &mut self,
        ids: &BTreeSet<String>,
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        let excluded: Vec<String> = ids.iter().cloned().collect();
        let excluded = Series::new("excluded_animals".into(), excluded);

        let df = self
            .original
            .clone()
            .lazy()
            .filter(col(columns::ANIMAL).is_in(lit(excluded), false).not())
            .collect()?;
        self.original = pipeline::reindex_time(df, self.sampling_interval)?;
        self.refresh_active(factors)
    }

    /// Rewrite an animal id in every row. No-op when the id is absent.
    pub fn rename_animal(
        &mut self,
        old_id: &str,
        new_id: &str,
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        self.original = self
            .original
            .clone()
            .lazy()
            .with_columns([when(col(columns::ANIMAL).eq(lit(old_id)))
                .then(lit(new_id))
                .otherwise(col(columns::ANIMAL))
                .alias(columns::ANIMAL)])
            .collect()?;
        self.refresh_active(factors)
    }

    /// Remove rows with `start <= DateTime < end`, then re-zero per-run
    /// elapsed time. An inverted range removes nothing.
    pub fn exclude_time(
        &mut self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        let start_us = start.and_utc().timestamp_micros();
        let end_us = end.and_utc().timestamp_micros();

        let df = self
            .original
            .clone()
            .lazy()
            .filter(
                col(columns::DATE_TIME)
                    .lt(lit(start_us))
                    .or(col(columns::DATE_TIME).gt_eq(lit(end_us))),
            )
            .collect()?;
        self.original = pipeline::reindex_time(df, self.sampling_interval)?;
        self.refresh_active(factors)
    }

    /// Keep only rows with `start <= DateTime <= end`, then re-zero per-run
    /// elapsed time. An inverted range yields an empty table, not an error.
    pub fn trim_time(
        &mut self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        let start_us = start.and_utc().timestamp_micros();
        let end_us = end.and_utc().timestamp_micros();

        let df = self
            .original
            .clone()
            .lazy()
            .filter(
                col(columns::DATE_TIME)
                    .gt_eq(lit(start_us))
                    .and(col(columns::DATE_TIME).lt_eq(lit(end_us))),
            )
            .collect()?;
        self.original = pipeline::reindex_time(df, self.sampling_interval)?;
        self.refresh_active(factors)
    }

    /// Remove variable columns from `original` and the variable metadata.
    pub fn delete_variables(
        &mut self,
        names: &[String],
        factors: &BTreeMap<String, Factor>,
    ) -> Result<(), PdkError> {
        for name in names {
            if !self.variables.contains_key(name) {
                return Err(PdkError::VariableNotFound(name.clone()));
            }
        }
        for name in names {
            self.variables.remove(name);
        }

        let dropped: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let keep: Vec<Expr> = self
            .original
            .get_column_names_str()
            .iter()
            .filter(|c| !dropped.contains(*c))
            .map(|c| col(*c))
            .collect();
        self.original = self.original.clone().lazy().select(keep).collect()?;
        self.refresh_active(factors)
    }

    /// Rebuild `active` from `original`: one string column per factor mapping
    /// each row's animal to its level (null for unassigned animals), sorted
    /// by `(Timedelta, Animal)`. The one and only way `active` changes.
    pub fn set_factors(&mut self, factors: &BTreeMap<String, Factor>) -> Result<(), PdkError> {
        let mut lf = self.original.clone().lazy();
        for factor in factors.values() {
            let level_map = factor.animal_level_map();
            let ids: Vec<String> = level_map.keys().cloned().collect();
            let levels: Vec<String> = level_map.values().cloned().collect();
            let lookup = df!(
                columns::ANIMAL => ids,
                factor.name.as_str() => levels,
            )?;
            lf = lf.join(
                lookup.lazy(),
                [col(columns::ANIMAL)],
                [col(columns::ANIMAL)],
                JoinArgs::new(JoinType::Left),
            );
        }
        self.active = lf
            .sort_by_exprs(
                [col(columns::TIMEDELTA), col(columns::ANIMAL)],
                SortMultipleOptions::default(),
            )
            .collect()?;
        Ok(())
    }

    /// Re-derive the factor annotation cache.
    pub fn refresh_active(&mut self, factors: &BTreeMap<String, Factor>) -> Result<(), PdkError> {
        self.set_factors(factors)
    }

    /// Earliest and latest observation of `original`, when any rows remain.
    pub fn time_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, PdkError> {
        let physical = self
            .original
            .column(columns::DATE_TIME)?
            .as_materialized_series()
            .cast(&DataType::Int64)?;
        let micros = physical.i64()?;
        let from_us = |us: i64| chrono::DateTime::from_timestamp_micros(us).map(|d| d.naive_utc());
        match (micros.min(), micros.max()) {
            (Some(a), Some(b)) => Ok(from_us(a).zip(from_us(b))),
            _ => Ok(None),
        }
    }
}
