use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::aggregation::Aggregation;
use crate::error::PdkError;

/// Tagged metadata value. Replaces the untyped property bags the monitoring
/// hardware exports alongside the observation tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// A single experimental subject, the primary row-grouping key.
#[derive(Debug, Clone, PartialEq)]
pub struct Animal {
    pub enabled: bool,
    /// Unique id; identity across every owned table.
    pub id: String,
    /// Display color, e.g. "#1f77b4".
    pub color: String,
    pub properties: BTreeMap<String, Value>,
}

impl Animal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            id: id.into(),
            color: String::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// A measured variable column and how it collapses under aggregation.
/// Immutable once created; removable via `Datatable::delete_variables`.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub unit: String,
    pub description: String,
    pub aggregation: Aggregation,
}

impl Variable {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            description: String::new(),
            aggregation,
        }
    }
}

/// One level of a categorical factor and the animals assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorLevel {
    pub name: String,
    pub color: String,
    pub animal_ids: BTreeSet<String>,
}

impl FactorLevel {
    pub fn new<I, S>(name: impl Into<String>, animal_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            color: String::new(),
            animal_ids: animal_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// A user-defined categorical grouping of animals (e.g. "Group":
/// Control/Treatment). Dataset-scoped; materialized as one string column per
/// factor in every datatable's active table.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub name: String,
    pub levels: Vec<FactorLevel>,
}

impl Factor {
    pub fn new(name: impl Into<String>, levels: Vec<FactorLevel>) -> Self {
        Self {
            name: name.into(),
            levels,
        }
    }

    /// Reject an animal id assigned to more than one level.
    pub fn validate(&self) -> Result<(), PdkError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for level in &self.levels {
            for id in &level.animal_ids {
                if !seen.insert(id.as_str()) {
                    return Err(PdkError::Validation(format!(
                        "Animal '{}' is assigned to multiple levels of factor '{}'",
                        id, self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Level name keyed by animal id, for mapping onto the Animal column.
    pub fn animal_level_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for level in &self.levels {
            for id in &level.animal_ids {
                map.insert(id.clone(), level.name.clone());
            }
        }
        map
    }

    pub(crate) fn rename_animal(&mut self, old_id: &str, new_id: &str) {
        for level in &mut self.levels {
            if level.animal_ids.remove(old_id) {
                level.animal_ids.insert(new_id.to_string());
            }
        }
    }

    pub(crate) fn remove_animals(&mut self, ids: &BTreeSet<String>) {
        for level in &mut self.levels {
            level.animal_ids.retain(|id| !ids.contains(id));
        }
    }
}

/// Import-time snapshot of dataset provenance, kept in sync with the live
/// animal map by the rename/exclude coordinators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetMetadata {
    pub name: String,
    /// Origin of the import, e.g. a source file path.
    pub source: Option<String>,
    pub experiment_started: Option<NaiveDateTime>,
    pub experiment_stopped: Option<NaiveDateTime>,
    /// Raw per-animal properties as imported, keyed by animal id.
    pub animals: BTreeMap<String, BTreeMap<String, Value>>,
    pub extra: BTreeMap<String, Value>,
}

/// A named analysis report accumulated against a dataset.
///
/// `dataset_id` is a non-owning back-reference; the owning `Dataset` is found
/// through the surrounding workspace, never through the report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub timestamp: NaiveDateTime,
    pub dataset_id: Uuid,
    pub name: String,
    pub content: String,
}

impl Report {
    pub fn new(dataset_id: Uuid, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Local::now().naive_local(),
            dataset_id,
            name: name.into(),
            content: content.into(),
        }
    }
}
