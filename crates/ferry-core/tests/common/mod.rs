//! Shared fixtures: legacy weather stations migrated into a new station
//! store, matched against a region reference store.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferry_core::{
    Aggregates, Cardinality, DestinationOptions, DuplicateContext, EngineConfig, ErrorResolution,
    MatchOptions, Matcher, MemoryStore, MigratableEntity, Migration, MigrationDefinition,
    MigrationError, MigrationService, RecordId, ResolutionStrategy, Result, SourceOptions,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyStation {
    pub id: i64,
    pub name: String,
    pub region_code: String,
}

impl MigratableEntity for LegacyStation {
    fn migratable_id(&self) -> RecordId {
        RecordId::Int(self.id)
    }

    fn migratable_description(&self) -> String {
        format!("station {} ({})", self.id, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: i64,
    pub code: String,
    pub name: String,
}

impl MigratableEntity for Region {
    fn migratable_id(&self) -> RecordId {
        RecordId::Int(self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub region_name: String,
}

impl MigratableEntity for Station {
    fn migratable_id(&self) -> RecordId {
        RecordId::Int(self.id)
    }
}

pub fn legacy(id: i64, region_code: &str) -> LegacyStation {
    LegacyStation {
        id,
        name: format!("Station {}", id),
        region_code: region_code.to_string(),
    }
}

pub fn region(id: i64, code: &str, name: &str) -> Region {
    Region {
        id,
        code: code.to_string(),
        name: name.to_string(),
    }
}

pub fn ids(ids: impl IntoIterator<Item = i64>) -> BTreeSet<RecordId> {
    ids.into_iter().map(RecordId::Int).collect()
}

/// Retry once without sleeping.
pub fn fast_resolution(strategy: ResolutionStrategy) -> ErrorResolution {
    ErrorResolution::default()
        .with_strategy(strategy)
        .with_retry_times(1)
        .with_retry_delay(Duration::ZERO)
}

/// Legacy stations to stations, looking up the region name by code.
pub struct StationMigration {
    pub id: &'static str,
    pub resolution: ErrorResolution,
    pub region_cardinality: Cardinality,
    pub batch_size: usize,
    pub fail_transform_for: BTreeSet<i64>,
    pub replace_duplicates: bool,
    pub duplicates_handled: Arc<AtomicUsize>,
}

impl Default for StationMigration {
    fn default() -> Self {
        Self {
            id: "stations",
            resolution: fast_resolution(ResolutionStrategy::ReportAndProceed),
            region_cardinality: Cardinality::ExactlyOne,
            batch_size: 3,
            fail_transform_for: BTreeSet::new(),
            replace_duplicates: false,
            duplicates_handled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Migration for StationMigration {
    type Source = MemoryStore<LegacyStation>;
    type Destination = MemoryStore<Station>;

    fn definition(&self) -> MigrationDefinition<Self> {
        MigrationDefinition::new(self.id, "legacy_stations", "stations")
            .with_source(
                SourceOptions::default()
                    .with_batch_size(self.batch_size)
                    .with_resolution(self.resolution),
            )
            .match_with::<MemoryStore<Region>>(
                "regions",
                MatchOptions::default()
                    .with_cardinality(self.region_cardinality)
                    .with_batch_size(self.batch_size)
                    .with_resolution(self.resolution),
            )
            .with_destination(
                DestinationOptions::default()
                    .with_cardinality(Cardinality::ExactlyOne)
                    .with_resolution(self.resolution),
            )
    }

    fn transform(&self, record: &LegacyStation, aggregates: &Aggregates) -> Result<Vec<Station>> {
        if self.fail_transform_for.contains(&record.id) {
            return Err(MigrationError::callback(format!(
                "cannot transform station {}",
                record.id
            )));
        }

        let region_name = aggregates
            .get::<Vec<String>>("regions")
            .and_then(|names| names.first())
            .cloned()
            .unwrap_or_default();
        Ok(vec![Station {
            id: record.id,
            name: record.name.clone(),
            region_name,
        }])
    }

    fn handle_duplicate(&self, duplicate: DuplicateContext<'_, Self>) -> Result<Option<Vec<Station>>> {
        self.duplicates_handled.fetch_add(1, Ordering::SeqCst);
        assert!(duplicate.error.is_duplicate());
        if self.replace_duplicates {
            Ok(Some(Vec::new()))
        } else {
            Ok(None)
        }
    }
}

impl Matcher<MemoryStore<Region>> for StationMigration {
    fn match_with(
        &self,
        record: &LegacyStation,
        _aggregates: &Aggregates,
        store: &MemoryStore<Region>,
    ) -> Result<Option<ferry_core::MemoryFilter>> {
        Ok(Some(store.filter_eq("code", record.region_code.clone())))
    }

    fn reduce_from(&self, aggregates: &mut Aggregates, matches: &[Region]) -> Result<()> {
        for region in matches {
            aggregates.push("regions", region.name.clone());
        }
        Ok(())
    }
}

/// Copies regions into an archive; runs after stations.
pub struct RegionArchive;

impl Migration for RegionArchive {
    type Source = MemoryStore<Region>;
    type Destination = MemoryStore<Region>;

    fn definition(&self) -> MigrationDefinition<Self> {
        MigrationDefinition::new("region_archive", "regions", "region_archive")
            .with_order(1)
            .with_source(
                SourceOptions::default()
                    .with_resolution(fast_resolution(ResolutionStrategy::ReportAndProceed)),
            )
    }

    fn transform(&self, record: &Region, _aggregates: &Aggregates) -> Result<Vec<Region>> {
        Ok(vec![record.clone()])
    }
}

pub struct TestContext {
    pub service: MigrationService,
    pub legacy: Arc<MemoryStore<LegacyStation>>,
    pub regions: Arc<MemoryStore<Region>>,
    pub stations: Arc<MemoryStore<Station>>,
    pub archive: Arc<MemoryStore<Region>>,
}

impl TestContext {
    /// Stations 1..=6 alternating between regions N and S.
    pub fn new() -> Self {
        Self::with_data(
            (1..=6).map(|id| legacy(id, if id % 2 == 1 { "N" } else { "S" })),
            vec![region(1, "N", "North"), region(2, "S", "South")],
        )
    }

    pub fn with_data(
        stations: impl IntoIterator<Item = LegacyStation>,
        regions: impl IntoIterator<Item = Region>,
    ) -> Self {
        let config = EngineConfig::new()
            .with_investigator_workers(2)
            .with_investigator_poll_interval(Duration::from_millis(5));
        let service = MigrationService::new(config);

        let legacy = Arc::new(MemoryStore::new("legacy_stations").with_records(stations));
        let regions = Arc::new(
            MemoryStore::new("regions")
                .with_field("code", |r: &Region| r.code.clone())
                .with_records(regions),
        );
        let stations = Arc::new(MemoryStore::<Station>::new("stations"));
        let archive = Arc::new(MemoryStore::<Region>::new("region_archive"));

        service.register_store(Arc::clone(&legacy));
        service.register_store(Arc::clone(&regions));
        service.register_store(Arc::clone(&stations));
        service.register_store(Arc::clone(&archive));

        Self {
            service,
            legacy,
            regions,
            stations,
            archive,
        }
    }

    pub fn register(mut self, migration: StationMigration) -> Self {
        self.service.register_migration(migration).unwrap();
        self
    }

    pub fn register_archive(mut self) -> Self {
        self.service.register_migration(RegionArchive).unwrap();
        self
    }

    pub fn failed_ids(&self, migration: &str) -> BTreeSet<RecordId> {
        self.service
            .progress()
            .failed_records(migration)
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    pub fn station(&self, id: i64) -> Option<Station> {
        self.stations.get(&RecordId::Int(id))
    }
}
