//! End-to-end scenarios over a small two-animal calorimetry dataset.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeDelta};
use polars::prelude::*;

use pheno_datakit::schema::columns;
use pheno_datakit::{
    Aggregation, Animal, BinningMode, BinningSettings, Dataset, Datatable, Factor, FactorLevel,
    OutliersMode, OutliersSettings, SplitMode, TimeIntervalsSettings, Variable,
};

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Hourly observations for each animal starting at `start`; the `kcal`
/// column is `base + hour` where A1 has base 10 and A2 base 20.
fn hourly_original(start: &str, rows: usize) -> DataFrame {
    let start = ts(start);
    let mut animal_col: Vec<String> = Vec::new();
    let mut dt_col: Vec<i64> = Vec::new();
    let mut td_col: Vec<i64> = Vec::new();
    let mut kcal: Vec<f64> = Vec::new();
    for i in 0..rows {
        for (j, a) in ["A1", "A2"].iter().enumerate() {
            let at = start + TimeDelta::hours(i as i64);
            animal_col.push((*a).to_string());
            dt_col.push(at.and_utc().timestamp_micros());
            td_col.push(TimeDelta::hours(i as i64).num_microseconds().unwrap());
            kcal.push((j as f64 + 1.0) * 10.0 + i as f64);
        }
    }
    df!(
        columns::ANIMAL => animal_col,
        columns::DATE_TIME => dt_col,
        columns::TIMEDELTA => td_col,
        "kcal" => kcal,
    )
    .unwrap()
    .lazy()
    .with_columns([
        col(columns::DATE_TIME).cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        col(columns::TIMEDELTA).cast(DataType::Duration(TimeUnit::Microseconds)),
    ])
    .collect()
    .unwrap()
}

/// One animal recorded over two runs twelve hours apart, four hourly rows
/// each; kcal counts up from 10 within run 1 and from 20 within run 2.
fn two_run_original() -> DataFrame {
    let mut animal_col: Vec<String> = Vec::new();
    let mut dt_col: Vec<i64> = Vec::new();
    let mut td_col: Vec<i64> = Vec::new();
    let mut run_col: Vec<i64> = Vec::new();
    let mut kcal: Vec<f64> = Vec::new();
    for (run, start, base) in [
        (1i64, "2024-01-01 00:00:00", 10.0),
        (2, "2024-01-01 12:00:00", 20.0),
    ] {
        let start = ts(start);
        for i in 0..4 {
            let at = start + TimeDelta::hours(i);
            animal_col.push("A1".to_string());
            dt_col.push(at.and_utc().timestamp_micros());
            td_col.push(TimeDelta::hours(i).num_microseconds().unwrap());
            run_col.push(run);
            kcal.push(base + i as f64);
        }
    }
    df!(
        columns::ANIMAL => animal_col,
        columns::DATE_TIME => dt_col,
        columns::TIMEDELTA => td_col,
        columns::RUN => run_col,
        "kcal" => kcal,
    )
    .unwrap()
    .lazy()
    .with_columns([
        col(columns::DATE_TIME).cast(DataType::Datetime(TimeUnit::Microseconds, None)),
        col(columns::TIMEDELTA).cast(DataType::Duration(TimeUnit::Microseconds)),
    ])
    .collect()
    .unwrap()
}

fn two_run_dataset() -> Dataset {
    let mut ds = Dataset::new("calo-merged", vec![Animal::new("A1")]);
    let mut vars = BTreeMap::new();
    vars.insert(
        "kcal".to_string(),
        Variable::new("kcal", "kcal/h", Aggregation::Mean),
    );
    let table = Datatable::new(
        "main",
        "two merged recording runs",
        two_run_original(),
        vars,
        Some(TimeDelta::hours(1)),
    )
    .unwrap();
    ds.add_datatable(table).unwrap();
    ds
}

fn dataset_with_rows(start: &str, rows: usize) -> Dataset {
    let mut ds = Dataset::new("calo-run", vec![Animal::new("A1"), Animal::new("A2")]);
    let mut vars = BTreeMap::new();
    vars.insert(
        "kcal".to_string(),
        Variable::new("kcal", "kcal/h", Aggregation::Mean),
    );
    let table = Datatable::new(
        "main",
        "primary calorimetry table",
        hourly_original(start, rows),
        vars,
        Some(TimeDelta::hours(1)),
    )
    .unwrap();
    ds.add_datatable(table).unwrap();
    ds
}

#[test]
fn exclude_time_rezeroes_each_run() {
    // 5 hourly rows per animal from 2024-01-01T00:00 to 04:00.
    let mut ds = dataset_with_rows("2024-01-01 00:00:00", 5);
    ds.exclude_time(ts("2023-12-31 00:00:00"), ts("2024-01-01 02:00:00"))
        .unwrap();

    assert_eq!(
        ds.metadata.experiment_started,
        Some(ts("2024-01-01 02:00:00"))
    );

    let table = ds.datatable("main").unwrap();
    assert_eq!(table.original().height(), 6);
    let td = table
        .original()
        .column(columns::TIMEDELTA)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap();
    let td = td.i64().unwrap();
    // Sorted by (Timedelta, Animal): both animals' first remaining rows are 0.
    assert_eq!(td.get(0), Some(0));
    assert_eq!(td.get(1), Some(0));
}

#[test]
fn exclude_then_trim_matches_direct_import() {
    // Excluding [03:00, 10:00) from a 10-row table and trimming the rest to
    // [00:00, 02:00] equals importing the first three hours directly.
    let mut carved = dataset_with_rows("2024-01-01 00:00:00", 10);
    carved
        .exclude_time(ts("2024-01-01 03:00:00"), ts("2024-01-01 10:00:00"))
        .unwrap();
    carved
        .trim_time(ts("2024-01-01 00:00:00"), ts("2024-01-01 02:00:00"))
        .unwrap();

    let direct = dataset_with_rows("2024-01-01 00:00:00", 3);

    let a = carved.datatable("main").unwrap().original();
    let b = direct.datatable("main").unwrap().original();
    assert!(a.equals_missing(b));
}

#[test]
fn outlier_scenario_rejects_the_spike() {
    let mut ds = Dataset::new("outliers", vec![Animal::new("A1")]);
    let kcal = [1.0f64, 2.0, 2.0, 3.0, 100.0];
    let mut vars = BTreeMap::new();
    vars.insert(
        "kcal".to_string(),
        Variable::new("kcal", "kcal/h", Aggregation::Mean),
    );
    let mut original = hourly_original("2024-01-01 00:00:00", 5);
    // Keep only A1's rows and overwrite kcal with the scenario values.
    original = original
        .lazy()
        .filter(col(columns::ANIMAL).eq(lit("A1")))
        .collect()
        .unwrap();
    original
        .replace("kcal", Series::new("kcal".into(), kcal.to_vec()))
        .unwrap();
    ds.add_datatable(
        Datatable::new("main", "", original, vars, Some(TimeDelta::hours(1))).unwrap(),
    )
    .unwrap();

    ds.apply_outliers(OutliersSettings {
        mode: OutliersMode::Remove,
        coefficient: 1.5,
    });

    let ctx = ds.query_context();
    let out = ds
        .datatable("main")
        .unwrap()
        .get_filtered_df(
            &[columns::ANIMAL.to_string(), "kcal".to_string()],
            &ctx,
        )
        .unwrap();

    let v = out.column("kcal").unwrap().f64().unwrap();
    assert_eq!(out.height(), 5);
    assert_eq!(v.null_count(), 1);
    assert_eq!(v.get(4), None);

    // With dropna the offending row disappears entirely.
    let out = ds
        .datatable("main")
        .unwrap()
        .get_preprocessed_df(
            &["kcal".to_string()],
            SplitMode::Animal,
            None,
            true,
            &ctx,
        )
        .unwrap();
    assert_eq!(out.height(), 4);
}

#[test]
fn total_split_conserves_the_mean() {
    let mut ds = dataset_with_rows("2024-01-01 00:00:00", 4);
    ds.apply_binning(BinningSettings {
        apply: true,
        mode: BinningMode::Intervals,
        intervals: TimeIntervalsSettings {
            delta: TimeDelta::hours(1),
            aggregate: true,
        },
        ..Default::default()
    });

    let ctx = ds.query_context();
    let table = ds.datatable("main").unwrap();

    let per_animal = table
        .get_preprocessed_df(&["kcal".to_string()], SplitMode::Animal, None, false, &ctx)
        .unwrap();
    let total = table
        .get_preprocessed_df(&["kcal".to_string()], SplitMode::Total, None, false, &ctx)
        .unwrap();

    // For each bin, the Total value must equal the mean over animals.
    let expected = per_animal
        .lazy()
        .group_by_stable([col(columns::BIN)])
        .agg([col("kcal").mean()])
        .sort_by_exprs([col(columns::BIN)], SortMultipleOptions::default())
        .collect()
        .unwrap();

    let got = total.column("kcal").unwrap().f64().unwrap();
    let want = expected.column("kcal").unwrap().f64().unwrap();
    assert_eq!(got.len(), want.len());
    for (g, w) in got.into_iter().zip(want.into_iter()) {
        let (g, w) = (g.unwrap(), w.unwrap());
        assert!((g - w).abs() < 1e-9, "total {g} != mean over animals {w}");
    }
}

#[test]
fn factor_split_groups_levels_and_ignores_unassigned() {
    let mut ds = dataset_with_rows("2024-01-01 00:00:00", 2);
    ds.set_factors(vec![Factor::new(
        "Group",
        vec![FactorLevel::new("Control", ["A1"])],
    )])
    .unwrap();
    ds.apply_binning(BinningSettings {
        apply: true,
        mode: BinningMode::Intervals,
        intervals: TimeIntervalsSettings {
            delta: TimeDelta::hours(1),
            aggregate: true,
        },
        ..Default::default()
    });

    let ctx = ds.query_context();
    let out = ds
        .datatable("main")
        .unwrap()
        .get_preprocessed_df(
            &["kcal".to_string()],
            SplitMode::Factor,
            Some("Group"),
            false,
            &ctx,
        )
        .unwrap();

    // Two bins, each with a Control row and a null-level row for A2.
    assert_eq!(out.height(), 4);
    let levels = out.column("Group").unwrap().str().unwrap();
    assert_eq!(
        levels.into_iter().filter(|l| *l == Some("Control")).count(),
        2
    );
    assert_eq!(levels.null_count(), 2);
}

#[test]
fn exclude_time_rezeroes_runs_independently() {
    let mut ds = two_run_dataset();
    // Drop run 1's first two hours; run 2 is untouched.
    ds.exclude_time(ts("2024-01-01 00:00:00"), ts("2024-01-01 02:00:00"))
        .unwrap();

    assert_eq!(
        ds.metadata.experiment_started,
        Some(ts("2024-01-01 02:00:00"))
    );

    let table = ds.datatable("main").unwrap();
    assert_eq!(table.original().height(), 6);
    let td = table
        .original()
        .column(columns::TIMEDELTA)
        .unwrap()
        .as_materialized_series()
        .cast(&DataType::Int64)
        .unwrap();
    let td = td.i64().unwrap();
    let hour = TimeDelta::hours(1).num_microseconds().unwrap();
    // Run 1 restarts at its first surviving row; run 2 keeps its own origin.
    let want = [0, hour, 0, hour, 2 * hour, 3 * hour];
    for (i, w) in want.into_iter().enumerate() {
        assert_eq!(td.get(i), Some(w), "row {i}");
    }
}

#[test]
fn run_split_aggregates_each_run() {
    let ds = two_run_dataset();
    let ctx = ds.query_context();
    let out = ds
        .datatable("main")
        .unwrap()
        .get_preprocessed_df(&["kcal".to_string()], SplitMode::Run, None, false, &ctx)
        .unwrap();

    // One row per run, kcal collapsed with its mean.
    assert_eq!(out.height(), 2);
    let runs = out.column(columns::RUN).unwrap().i64().unwrap();
    assert_eq!(runs.get(0), Some(1));
    assert_eq!(runs.get(1), Some(2));
    let kcal = out.column("kcal").unwrap().f64().unwrap();
    assert_eq!(kcal.get(0), Some(11.5));
    assert_eq!(kcal.get(1), Some(21.5));
}

#[test]
fn unknown_variable_is_a_typed_error() {
    let ds = dataset_with_rows("2024-01-01 00:00:00", 2);
    let ctx = ds.query_context();
    let err = ds
        .datatable("main")
        .unwrap()
        .get_preprocessed_df(
            &["vo2".to_string()],
            SplitMode::Animal,
            None,
            false,
            &ctx,
        )
        .unwrap_err();
    assert!(matches!(err, pheno_datakit::PdkError::VariableNotFound(_)));
}

#[test]
fn preprocessed_columns_derives_variables_from_selection() {
    let ds = dataset_with_rows("2024-01-01 00:00:00", 3);
    let ctx = ds.query_context();
    let out = ds
        .datatable("main")
        .unwrap()
        .get_preprocessed_df_columns(
            &[columns::ANIMAL.to_string(), "kcal".to_string()],
            SplitMode::Total,
            None,
            false,
            &ctx,
        )
        .unwrap();

    // No binning applied: Total folds everything into one row.
    assert_eq!(out.height(), 1);
    // Mean over 10+11+12 and 20+21+22.
    assert_eq!(out.column("kcal").unwrap().f64().unwrap().get(0), Some(16.0));
}
