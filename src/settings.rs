use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

/// How rows are re-tagged or re-aggregated into `Bin` windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinningMode {
    /// Fixed-width windows over `Timedelta`.
    #[default]
    Intervals,
    /// Light/dark tagging from wall-clock time of day.
    Cycles,
    /// User-defined named phases over `DateTime`.
    Phases,
}

/// Fixed-width interval binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIntervalsSettings {
    /// Window width.
    pub delta: TimeDelta,
    /// Aggregate rows by `(Animal, Bin)`; when false, `Bin` is only tagged.
    pub aggregate: bool,
}

impl Default for TimeIntervalsSettings {
    fn default() -> Self {
        Self {
            delta: TimeDelta::hours(1),
            aggregate: true,
        }
    }
}

/// Light/dark cycle boundaries. The cycle is circular: a dark start earlier
/// in the day than the light start means the light window wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCyclesSettings {
    pub light_cycle_start: NaiveTime,
    pub dark_cycle_start: NaiveTime,
}

impl Default for TimeCyclesSettings {
    fn default() -> Self {
        Self {
            light_cycle_start: NaiveTime::from_hms_opt(7, 0, 0).expect("07:00 is a valid time"),
            dark_cycle_start: NaiveTime::from_hms_opt(19, 0, 0).expect("19:00 is a valid time"),
        }
    }
}

/// A named phase starting at a fixed timestamp. Phases are cut-points: a row
/// belongs to the latest phase whose start is not after the row's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePhase {
    pub name: String,
    pub start: NaiveDateTime,
}

impl TimePhase {
    pub fn new(name: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinningSettings {
    /// Queries run the binner only when set.
    pub apply: bool,
    pub mode: BinningMode,
    pub intervals: TimeIntervalsSettings,
    pub cycles: TimeCyclesSettings,
    pub phases: Vec<TimePhase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutliersMode {
    #[default]
    Off,
    Remove,
}

/// IQR-band outlier rejection: values outside
/// `[Q1 - coefficient*IQR, Q3 + coefficient*IQR]` are rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutliersSettings {
    pub mode: OutliersMode,
    pub coefficient: f64,
}

impl Default for OutliersSettings {
    fn default() -> Self {
        Self {
            mode: OutliersMode::Off,
            coefficient: 1.5,
        }
    }
}

/// Grouping key shaping a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    /// Per-animal rows stay distinct.
    #[default]
    Animal,
    /// Aggregate per recording session.
    Run,
    /// Aggregate per level of a named factor.
    Factor,
    /// Aggregate everything sharing a bin.
    Total,
}
