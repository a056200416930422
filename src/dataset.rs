use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::datatable::{Datatable, QueryContext};
use crate::error::PdkError;
use crate::model::{Animal, DatasetMetadata, Factor, Report};
use crate::settings::{BinningSettings, OutliersSettings};

/// Aggregate root for one imported experiment: the animal set, the owned
/// datatables, the factor definitions and the current binning/outlier
/// settings. Every cross-table mutation goes through here so the owned
/// collections stay mutually consistent.
///
/// `Clone` yields an independent dataset; polars columns are immutable
/// Arc-backed buffers, so the copies can never observe each other's edits.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: Uuid,
    pub metadata: DatasetMetadata,
    pub animals: BTreeMap<String, Animal>,
    pub datatables: BTreeMap<String, Datatable>,
    pub factors: BTreeMap<String, Factor>,
    pub reports: BTreeMap<String, Report>,
    pub binning_settings: BinningSettings,
    pub outliers_settings: OutliersSettings,
}

impl Dataset {
    /// Create a dataset from an import snapshot of animals.
    pub fn new(name: impl Into<String>, animals: Vec<Animal>) -> Self {
        let name = name.into();
        let mut metadata = DatasetMetadata {
            name: name.clone(),
            ..Default::default()
        };
        let mut animal_map = BTreeMap::new();
        for animal in animals {
            metadata
                .animals
                .insert(animal.id.clone(), animal.properties.clone());
            animal_map.insert(animal.id.clone(), animal);
        }
        Self {
            id: Uuid::new_v4(),
            metadata,
            animals: animal_map,
            datatables: BTreeMap::new(),
            factors: BTreeMap::new(),
            reports: BTreeMap::new(),
            binning_settings: BinningSettings::default(),
            outliers_settings: OutliersSettings::default(),
        }
    }

    /// Adopt a datatable: its active table is rebuilt against the current
    /// factor set and the experiment window is widened to cover it.
    pub fn add_datatable(&mut self, mut datatable: Datatable) -> Result<(), PdkError> {
        datatable.refresh_active(&self.factors)?;
        debug!(dataset = %self.id, table = %datatable.name, rows = datatable.original().height(), "datatable added");
        self.datatables.insert(datatable.name.clone(), datatable);
        self.update_experiment_window()
    }

    pub fn datatable(&self, name: &str) -> Option<&Datatable> {
        self.datatables.get(name)
    }

    /// The read-only state a datatable query needs.
    pub fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            animals: &self.animals,
            factors: &self.factors,
            binning: &self.binning_settings,
            outliers: &self.outliers_settings,
        }
    }

    pub fn rename(&mut self, new_name: impl Into<String>) {
        self.metadata.name = new_name.into();
    }

    /// Group animals by the value of an existing property, yielding a
    /// prospective factor's levels. Empty when no animal has the property.
    pub fn extract_levels_from_property(
        &self,
        property: &str,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut levels: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for animal in self.animals.values() {
            if let Some(value) = animal.properties.get(property) {
                levels
                    .entry(value.to_string())
                    .or_default()
                    .insert(animal.id.clone());
            }
        }
        levels
    }

    /// Rewrite an animal id across the animal map, the metadata mirror,
    /// every factor level and every owned datatable. Silently a no-op when
    /// `old_id` is absent; callers pre-validate.
    pub fn rename_animal(&mut self, old_id: &str, new_animal: Animal) -> Result<(), PdkError> {
        if !self.animals.contains_key(old_id) {
            return Ok(());
        }
        let new_id = new_animal.id.clone();

        self.animals.remove(old_id);
        self.metadata.animals.remove(old_id);
        self.metadata
            .animals
            .insert(new_id.clone(), new_animal.properties.clone());
        self.animals.insert(new_id.clone(), new_animal);

        for factor in self.factors.values_mut() {
            factor.rename_animal(old_id, &new_id);
        }

        let factors = self.factors.clone();
        for datatable in self.datatables.values_mut() {
            datatable.rename_animal(old_id, &new_id, &factors)?;
        }

        info!(dataset = %self.id, old = old_id, new = %new_id, "animal renamed");
        Ok(())
    }

    /// Remove animals from every owned collection and drop their rows in
    /// every datatable, re-zeroing per-run elapsed time afterwards.
    pub fn exclude_animals(&mut self, ids: &BTreeSet<String>) -> Result<(), PdkError> {
        for id in ids {
            self.animals.remove(id);
            self.metadata.animals.remove(id);
        }
        for factor in self.factors.values_mut() {
            factor.remove_animals(ids);
        }

        let factors = self.factors.clone();
        for datatable in self.datatables.values_mut() {
            datatable.exclude_animals(ids, &factors)?;
        }
        self.update_experiment_window()?;

        info!(dataset = %self.id, count = ids.len(), "animals excluded");
        Ok(())
    }

    /// Remove observations with `start <= DateTime < end` from every
    /// datatable; surviving runs restart their elapsed time at their first
    /// remaining timestamp.
    pub fn exclude_time(&mut self, start: NaiveDateTime, end: NaiveDateTime) -> Result<(), PdkError> {
        let factors = self.factors.clone();
        for datatable in self.datatables.values_mut() {
            datatable.exclude_time(start, end, &factors)?;
        }
        self.update_experiment_window()?;
        info!(dataset = %self.id, %start, %end, "time range excluded");
        Ok(())
    }

    /// Keep only observations with `start <= DateTime <= end` in every
    /// datatable. An inverted range yields empty tables, not an error.
    pub fn trim_time(&mut self, start: NaiveDateTime, end: NaiveDateTime) -> Result<(), PdkError> {
        let factors = self.factors.clone();
        for datatable in self.datatables.values_mut() {
            datatable.trim_time(start, end, &factors)?;
        }
        self.update_experiment_window()?;
        info!(dataset = %self.id, %start, %end, "time range trimmed");
        Ok(())
    }

    /// Replace the factor set and push a level column per factor into every
    /// datatable's active table. Every factor is validated before anything
    /// is mutated, so a failed call is a no-op.
    pub fn set_factors(&mut self, factors: Vec<Factor>) -> Result<(), PdkError> {
        for factor in &factors {
            factor.validate()?;
        }

        self.factors = factors
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();

        let factors = self.factors.clone();
        for datatable in self.datatables.values_mut() {
            datatable.set_factors(&factors)?;
        }
        info!(dataset = %self.id, count = factors.len(), "factors assigned");
        Ok(())
    }

    /// Store binning settings; queries pick them up lazily. The tracing
    /// event doubles as the "recompute your view" broadcast.
    pub fn apply_binning(&mut self, settings: BinningSettings) {
        self.binning_settings = settings;
        info!(dataset = %self.id, kind = "binning", "settings applied");
    }

    pub fn apply_outliers(&mut self, settings: OutliersSettings) {
        self.outliers_settings = settings;
        info!(dataset = %self.id, kind = "outliers", "settings applied");
    }

    /// Insert a report; a name collision appends the new content to the
    /// existing report instead of replacing it.
    pub fn add_report(&mut self, report: Report) {
        match self.reports.get_mut(&report.name) {
            Some(existing) => {
                existing.content.push_str(&report.content);
                existing.timestamp = report.timestamp;
            }
            None => {
                self.reports.insert(report.name.clone(), report);
            }
        }
    }

    /// Remove a report by name; unknown names are ignored.
    pub fn delete_report(&mut self, name: &str) {
        self.reports.remove(name);
    }

    /// Recompute the experiment window from the surviving observations.
    fn update_experiment_window(&mut self) -> Result<(), PdkError> {
        let mut started: Option<NaiveDateTime> = None;
        let mut stopped: Option<NaiveDateTime> = None;
        for datatable in self.datatables.values() {
            if let Some((a, b)) = datatable.time_range()? {
                started = Some(started.map_or(a, |s| s.min(a)));
                stopped = Some(stopped.map_or(b, |s| s.max(b)));
            }
        }
        self.metadata.experiment_started = started;
        self.metadata.experiment_stopped = stopped;
        Ok(())
    }
}
