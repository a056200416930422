/// Column-name constants for pheno-datakit tables.
/// Single source of truth for every pipeline stage.

// ── Default observation columns ─────────────────────────────────────────────
pub mod columns {
    /// Animal id, one subject per value. Plain utf8: polars strings group
    /// like categoricals and row removal inherently drops unused values.
    pub const ANIMAL: &str = "Animal";
    /// Wall-clock timestamp of the observation (naive, microseconds).
    pub const DATE_TIME: &str = "DateTime";
    /// Elapsed time since the owning run's first observation.
    pub const TIMEDELTA: &str = "Timedelta";
    /// Integer or label grouping rows into a time window.
    pub const BIN: &str = "Bin";
    /// Recording-session index, present on merged datasets.
    pub const RUN: &str = "Run";

    /// Columns every observation row carries.
    pub const DEFAULT: [&str; 3] = [ANIMAL, TIMEDELTA, DATE_TIME];
}

// ── Cycle labels ────────────────────────────────────────────────────────────
pub mod cycle {
    pub const LIGHT: &str = "Light";
    pub const DARK: &str = "Dark";
}

// ── Grouping keys ───────────────────────────────────────────────────────────
pub mod split {
    pub const TOTAL: &str = "Total";
}

/// True for the structural columns that are never variable columns.
pub fn is_default_column(name: &str) -> bool {
    name == columns::ANIMAL
        || name == columns::DATE_TIME
        || name == columns::TIMEDELTA
        || name == columns::BIN
        || name == columns::RUN
}
