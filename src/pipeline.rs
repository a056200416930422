use std::collections::BTreeMap;

use chrono::Timelike;
use polars::prelude::*;

use crate::error::PdkError;
use crate::model::{Animal, Variable};
use crate::schema::{columns, cycle};
use crate::settings::{BinningMode, BinningSettings, OutliersMode, OutliersSettings, SplitMode};

/// Keep rows whose `Animal` id maps to an enabled animal. Disabled and
/// unknown/stale ids are dropped without error.
pub fn filter_enabled_animals(
    df: DataFrame,
    animals: &BTreeMap<String, Animal>,
) -> Result<DataFrame, PdkError> {
    let enabled: Vec<String> = animals
        .values()
        .filter(|a| a.enabled)
        .map(|a| a.id.clone())
        .collect();
    let enabled = Series::new("enabled_animals".into(), enabled);

    let df = df
        .lazy()
        .filter(col(columns::ANIMAL).is_in(lit(enabled), false))
        .collect()?;
    Ok(df)
}

/// IQR outlier rejection over `variables`, cell granularity: a value outside
/// `[Q1 - c*IQR, Q3 + c*IQR]` for its column is nulled, the row survives for
/// its in-band variables. Callers drop rows via `dropna` when they need to.
pub fn remove_outliers(
    df: DataFrame,
    settings: &OutliersSettings,
    variables: &[String],
) -> Result<DataFrame, PdkError> {
    if settings.mode != OutliersMode::Remove {
        return Ok(df);
    }

    let schema = df.schema().clone();
    let mut exprs: Vec<Expr> = Vec::new();
    for name in variables {
        if !schema.contains(name.as_str()) {
            continue;
        }
        let q1 = col(name.as_str()).quantile(lit(0.25), QuantileMethod::Linear);
        let q3 = col(name.as_str()).quantile(lit(0.75), QuantileMethod::Linear);
        let iqr = q3.clone() - q1.clone();
        let lo = q1 - iqr.clone() * lit(settings.coefficient);
        let hi = q3 + iqr * lit(settings.coefficient);

        exprs.push(
            when(col(name.as_str()).lt(lo).or(col(name.as_str()).gt(hi)))
                .then(lit(NULL))
                .otherwise(col(name.as_str()))
                .alias(name.as_str()),
        );
    }

    if exprs.is_empty() {
        return Ok(df);
    }
    let df = df.lazy().with_columns(exprs).collect()?;
    Ok(df)
}

/// Tag (and, depending on mode/settings, aggregate) rows into `Bin` windows.
pub fn apply_binning(
    df: DataFrame,
    settings: &BinningSettings,
    variables: &BTreeMap<String, Variable>,
) -> Result<DataFrame, PdkError> {
    match settings.mode {
        BinningMode::Intervals => bin_by_intervals(df, settings, variables),
        BinningMode::Cycles => {
            let tagged = tag_cycles(df, settings)?;
            aggregate_bins(tagged, variables)
        }
        BinningMode::Phases => {
            let tagged = tag_phases(df, settings)?;
            aggregate_bins(tagged, variables)
        }
    }
}

fn bin_by_intervals(
    df: DataFrame,
    settings: &BinningSettings,
    variables: &BTreeMap<String, Variable>,
) -> Result<DataFrame, PdkError> {
    let delta_us = settings.intervals.delta.num_microseconds().ok_or_else(|| {
        PdkError::Validation("Binning interval overflows microseconds".to_string())
    })?;
    if delta_us <= 0 {
        return Err(PdkError::Validation(
            "Binning interval must be positive".to_string(),
        ));
    }

    let tagged = df
        .lazy()
        .with_columns([interval_bin_expr(delta_us)])
        .collect()?;

    if settings.intervals.aggregate {
        aggregate_bins(tagged, variables)
    } else {
        Ok(tagged)
    }
}

/// `Bin = round(Timedelta / delta)` as Int64. Timedelta is non-negative
/// after re-indexing, so round-half-up is `floor(x + 1/2)`.
fn interval_bin_expr(delta_us: i64) -> Expr {
    (col(columns::TIMEDELTA)
        .dt()
        .total_microseconds()
        .cast(DataType::Float64)
        / lit(delta_us as f64)
        + lit(0.5))
    .floor()
    .cast(DataType::Int64)
    .alias(columns::BIN)
}

/// Tag rows Light/Dark by wall-clock time of day. The light window is
/// `[light_cycle_start, dark_cycle_start)` and may wrap past midnight.
fn tag_cycles(df: DataFrame, settings: &BinningSettings) -> Result<DataFrame, PdkError> {
    let light_s = settings.cycles.light_cycle_start.num_seconds_from_midnight() as i64;
    let dark_s = settings.cycles.dark_cycle_start.num_seconds_from_midnight() as i64;

    let second_of_day = col(columns::DATE_TIME).dt().hour().cast(DataType::Int64) * lit(3600)
        + col(columns::DATE_TIME).dt().minute().cast(DataType::Int64) * lit(60)
        + col(columns::DATE_TIME).dt().second().cast(DataType::Int64);

    let in_light = if light_s <= dark_s {
        second_of_day
            .clone()
            .gt_eq(lit(light_s))
            .and(second_of_day.lt(lit(dark_s)))
    } else {
        // Light window crosses midnight: two disjoint ranges.
        second_of_day
            .clone()
            .gt_eq(lit(light_s))
            .or(second_of_day.lt(lit(dark_s)))
    };

    let df = df
        .lazy()
        .with_columns([when(in_light)
            .then(lit(cycle::LIGHT))
            .otherwise(lit(cycle::DARK))
            .alias(columns::BIN)])
        .collect()?;
    Ok(df)
}

/// Tag rows by the latest phase whose start is not after the row's timestamp.
/// Rows before every phase get a null tag.
fn tag_phases(df: DataFrame, settings: &BinningSettings) -> Result<DataFrame, PdkError> {
    let mut phases = settings.phases.clone();
    phases.sort_by_key(|p| p.start);

    let mut tag = lit(NULL).cast(DataType::String);
    for phase in &phases {
        let start_us = phase.start.and_utc().timestamp_micros();
        tag = when(col(columns::DATE_TIME).gt_eq(lit(start_us)))
            .then(lit(phase.name.as_str()))
            .otherwise(tag);
    }

    let df = df
        .lazy()
        .with_columns([tag.alias(columns::BIN)])
        .collect()?;
    Ok(df)
}

/// Fold tagged rows by `(Animal, Run?, Bin)`: variable columns collapse with
/// their configured aggregation, every other column with `first`.
fn aggregate_bins(
    df: DataFrame,
    variables: &BTreeMap<String, Variable>,
) -> Result<DataFrame, PdkError> {
    let mut keys = vec![columns::ANIMAL.to_string()];
    if df.schema().contains(columns::RUN) {
        keys.push(columns::RUN.to_string());
    }
    keys.push(columns::BIN.to_string());
    aggregate_groups(df, &keys, variables)
}

/// Reshape rows by split mode. Animal mode is the identity; the other modes
/// aggregate rows sharing `(key, Bin?)` with each variable's aggregation.
pub fn split_by_mode(
    df: DataFrame,
    split_mode: SplitMode,
    factor_name: Option<&str>,
    variables: &BTreeMap<String, Variable>,
) -> Result<DataFrame, PdkError> {
    let key = match split_mode {
        SplitMode::Animal => return Ok(df),
        SplitMode::Run => {
            if !df.schema().contains(columns::RUN) {
                return Err(PdkError::InvalidState(
                    "Cannot group by Run: no Run column is present".to_string(),
                ));
            }
            Some(columns::RUN.to_string())
        }
        SplitMode::Factor => {
            let name = factor_name.ok_or_else(|| {
                PdkError::InvalidState("Factor split mode requires a factor name".to_string())
            })?;
            if !df.schema().contains(name) {
                return Err(PdkError::FactorNotFound(name.to_string()));
            }
            Some(name.to_string())
        }
        SplitMode::Total => None,
    };

    let mut keys: Vec<String> = key.into_iter().collect();
    if df.schema().contains(columns::BIN) {
        keys.push(columns::BIN.to_string());
    }

    // Keep only the key columns, timing columns and the queried variables;
    // per-animal and other-factor columns would be meaningless after folding.
    let mut selection: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
    for name in [columns::DATE_TIME, columns::TIMEDELTA] {
        if df.schema().contains(name) {
            selection.push(col(name));
        }
    }
    let mut kept_variables: Vec<String> = Vec::new();
    for name in df.get_column_names_str() {
        if variables.contains_key(name) {
            selection.push(col(name));
            kept_variables.push(name.to_string());
        }
    }
    let projected = df.lazy().select(selection).collect()?;

    if keys.is_empty() {
        // Total mode without bins: fold the whole table into one row.
        let mut aggs: Vec<Expr> = Vec::new();
        for name in [columns::DATE_TIME, columns::TIMEDELTA] {
            if projected.schema().contains(name) {
                aggs.push(col(name).first());
            }
        }
        for name in &kept_variables {
            if let Some(var) = variables.get(name) {
                aggs.push(var.aggregation.expr(name));
            }
        }
        let df = projected.lazy().select(aggs).collect()?;
        return Ok(df);
    }

    aggregate_groups(projected, &keys, variables)
}

/// Group by `keys`, collapsing variable columns with their configured
/// aggregation and every other non-key column with `first`. Output is sorted
/// by the keys.
pub fn aggregate_groups(
    df: DataFrame,
    keys: &[String],
    variables: &BTreeMap<String, Variable>,
) -> Result<DataFrame, PdkError> {
    let mut aggs: Vec<Expr> = Vec::new();
    for name in df.get_column_names_str() {
        if keys.iter().any(|k| k.as_str() == name) {
            continue;
        }
        if let Some(var) = variables.get(name) {
            aggs.push(var.aggregation.expr(name));
        } else {
            aggs.push(col(name).first());
        }
    }

    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
    let df = df
        .lazy()
        .group_by_stable(key_exprs.clone())
        .agg(aggs)
        .sort_by_exprs(key_exprs, SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

/// Recompute `Timedelta` (and `Bin`, when present and an interval is known)
/// after row removal. Elapsed time restarts at each run's earliest surviving
/// timestamp; merged datasets retain independent run origins.
pub fn reindex_time(
    df: DataFrame,
    sampling_interval: Option<chrono::TimeDelta>,
) -> Result<DataFrame, PdkError> {
    let run_start = if df.schema().contains(columns::RUN) {
        col(columns::DATE_TIME).min().over([col(columns::RUN)])
    } else {
        col(columns::DATE_TIME).min()
    };

    let mut lf = df
        .clone()
        .lazy()
        .with_columns([(col(columns::DATE_TIME) - run_start).alias(columns::TIMEDELTA)]);

    if df.schema().contains(columns::BIN) {
        if let Some(interval) = sampling_interval {
            if let Some(delta_us) = interval.num_microseconds().filter(|us| *us > 0) {
                lf = lf.with_columns([interval_bin_expr(delta_us)]);
            }
        }
    }

    Ok(lf.collect()?)
}
