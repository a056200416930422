use polars::prelude::*;

/// How a variable column collapses when rows sharing a group key are folded
/// into one: binning, resampling and split-mode grouping all defer to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
    Sum,
    First,
    Last,
    Min,
    Max,
}

impl Aggregation {
    /// Aggregation expression for `column`, keeping its name.
    pub fn expr(&self, column: &str) -> Expr {
        match self {
            Aggregation::Mean => col(column).mean(),
            Aggregation::Median => col(column).median(),
            Aggregation::Sum => col(column).sum(),
            Aggregation::First => col(column).first(),
            Aggregation::Last => col(column).last(),
            Aggregation::Min => col(column).min(),
            Aggregation::Max => col(column).max(),
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Aggregation::Mean => "mean",
            Aggregation::Median => "median",
            Aggregation::Sum => "sum",
            Aggregation::First => "first",
            Aggregation::Last => "last",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        };
        write!(f, "{name}")
    }
}
