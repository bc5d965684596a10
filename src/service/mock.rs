//! In-memory data service for tests and local development.
//!
//! The `MockDataService` is pre-populated with fixtures and answers every
//! call from them. Calls are counted per [`Operation`], failures can be
//! injected per operation and key, and an optional latency makes every call
//! suspend so that concurrent behaviour can be observed.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::model::{
    CancerStudy, ClinicalData, DataQueryFilter, DiscreteCopyNumberData, Gene, GeneMolecularData,
    MolecularProfile, Mutation, Sample, SampleIdentifier,
};
use crate::service::{DataService, Result};

/// The remote calls the mock can count and fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    MolecularProfile,
    MolecularProfilesInStudy,
    Samples,
    SampleIdsInList,
    ClinicalData,
    Genes,
    Study,
    Mutations,
    MolecularData,
    DiscreteCopyNumberData,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::MolecularProfile => "fetch_molecular_profile",
            Self::MolecularProfilesInStudy => "fetch_molecular_profiles_in_study",
            Self::Samples => "fetch_samples",
            Self::SampleIdsInList => "fetch_sample_ids_in_list",
            Self::ClinicalData => "fetch_clinical_data",
            Self::Genes => "fetch_genes",
            Self::Study => "fetch_study",
            Self::Mutations => "fetch_mutations",
            Self::MolecularData => "fetch_molecular_data",
            Self::DiscreteCopyNumberData => "fetch_discrete_copy_number_data",
        }
    }
}

#[derive(Default)]
struct Fixtures {
    profiles: Vec<MolecularProfile>,
    samples: Vec<Sample>,
    sample_lists: HashMap<String, Vec<String>>,
    clinical: Vec<ClinicalData>,
    genes: Vec<Gene>,
    studies: Vec<CancerStudy>,
    mutations: Vec<Mutation>,
    molecular_data: Vec<GeneMolecularData>,
    discrete_cna: Vec<DiscreteCopyNumberData>,
}

impl Fixtures {
    fn admits(&self, filter: &DataQueryFilter, sample_id: &str) -> bool {
        match filter {
            DataQueryFilter::SampleIds(ids) => ids.iter().any(|id| id == sample_id),
            DataQueryFilter::SampleListId(list) => self
                .sample_lists
                .get(list)
                .is_some_and(|ids| ids.iter().any(|id| id == sample_id)),
        }
    }
}

/// Mock data service answering from pre-registered fixtures.
#[derive(Default)]
pub struct MockDataService {
    fixtures: RwLock<Fixtures>,
    calls: Mutex<HashMap<Operation, usize>>,
    /// Operation → keys that fail; `None` fails every call of the operation.
    failures: Mutex<HashMap<Operation, Option<HashSet<String>>>>,
    latency: Option<Duration>,
}

impl MockDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call sleep for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_profile(&self, profile: MolecularProfile) {
        self.write().profiles.push(profile);
    }

    pub fn add_sample(&self, sample: Sample) {
        self.write().samples.push(sample);
    }

    pub fn add_sample_list(&self, sample_list_id: &str, sample_ids: &[&str]) {
        let ids = sample_ids.iter().map(|id| id.to_string()).collect();
        self.write().sample_lists.insert(sample_list_id.to_owned(), ids);
    }

    pub fn add_clinical_data(&self, data: ClinicalData) {
        self.write().clinical.push(data);
    }

    pub fn add_gene(&self, gene: Gene) {
        self.write().genes.push(gene);
    }

    pub fn add_study(&self, study: CancerStudy) {
        self.write().studies.push(study);
    }

    pub fn add_mutation(&self, mutation: Mutation) {
        self.write().mutations.push(mutation);
    }

    pub fn add_molecular_data(&self, data: GeneMolecularData) {
        self.write().molecular_data.push(data);
    }

    pub fn add_discrete_cna(&self, data: DiscreteCopyNumberData) {
        self.write().discrete_cna.push(data);
    }

    /// Fails calls of `operation` whose key (profile, study or sample list
    /// id) equals `key`.
    pub fn fail(&self, operation: Operation, key: &str) {
        let mut failures = lock(&self.failures);
        if let Some(keys) = failures.entry(operation).or_insert_with(|| Some(HashSet::new())) {
            keys.insert(key.to_owned());
        }
    }

    /// Fails every call of `operation`.
    pub fn fail_all(&self, operation: Operation) {
        lock(&self.failures).insert(operation, None);
    }

    /// Removes every injected failure.
    pub fn heal(&self) {
        lock(&self.failures).clear();
    }

    /// Number of calls made to `operation` so far, failed ones included.
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, Fixtures> {
        self.fixtures.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Fixtures> {
        self.fixtures.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call, waits out the latency and applies injected failures.
    async fn enter(&self, operation: Operation, key: &str) -> Result<()> {
        *lock(&self.calls).entry(operation).or_default() += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = match lock(&self.failures).get(&operation) {
            Some(None) => true,
            Some(Some(keys)) => keys.contains(key),
            None => false,
        };

        if failing {
            return Err(ServiceError::Transient {
                operation: operation.name(),
                message: format!("injected failure for '{key}'"),
            });
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl DataService for MockDataService {
    async fn fetch_molecular_profile(&self, molecular_profile_id: &str) -> Result<MolecularProfile> {
        self.enter(Operation::MolecularProfile, molecular_profile_id).await?;
        self.read()
            .profiles
            .iter()
            .find(|p| p.molecular_profile_id == molecular_profile_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("molecular profile '{molecular_profile_id}'")))
    }

    async fn fetch_molecular_profiles_in_study(&self, study_id: &str) -> Result<Vec<MolecularProfile>> {
        self.enter(Operation::MolecularProfilesInStudy, study_id).await?;
        Ok(self
            .read()
            .profiles
            .iter()
            .filter(|p| p.study_id == study_id)
            .cloned()
            .collect())
    }

    async fn fetch_samples(&self, identifiers: &[SampleIdentifier]) -> Result<Vec<Sample>> {
        self.enter(Operation::Samples, "").await?;
        let fixtures = self.read();
        Ok(identifiers
            .iter()
            .filter_map(|id| {
                fixtures
                    .samples
                    .iter()
                    .find(|s| s.study_id == id.study_id && s.sample_id == id.sample_id)
                    .cloned()
            })
            .collect())
    }

    async fn fetch_sample_ids_in_list(&self, sample_list_id: &str) -> Result<Vec<String>> {
        self.enter(Operation::SampleIdsInList, sample_list_id).await?;
        self.read()
            .sample_lists
            .get(sample_list_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("sample list '{sample_list_id}'")))
    }

    async fn fetch_clinical_data(
        &self,
        attribute_ids: &[String],
        identifiers: &[SampleIdentifier],
    ) -> Result<Vec<ClinicalData>> {
        self.enter(Operation::ClinicalData, "").await?;
        Ok(self
            .read()
            .clinical
            .iter()
            .filter(|d| attribute_ids.contains(&d.clinical_attribute_id))
            .filter(|d| {
                identifiers
                    .iter()
                    .any(|id| id.study_id == d.study_id && id.sample_id == d.entity_id)
            })
            .cloned()
            .collect())
    }

    async fn fetch_genes(&self, hugo_gene_symbols: &[String]) -> Result<Vec<Gene>> {
        self.enter(Operation::Genes, "").await?;
        let fixtures = self.read();
        Ok(hugo_gene_symbols
            .iter()
            .filter_map(|symbol| fixtures.genes.iter().find(|g| &g.hugo_gene_symbol == symbol).cloned())
            .collect())
    }

    async fn fetch_study(&self, study_id: &str) -> Result<CancerStudy> {
        self.enter(Operation::Study, study_id).await?;
        self.read()
            .studies
            .iter()
            .find(|s| s.study_id == study_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("study '{study_id}'")))
    }

    async fn fetch_mutations(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
        entrez_gene_ids: &[i64],
    ) -> Result<Vec<Mutation>> {
        self.enter(Operation::Mutations, molecular_profile_id).await?;
        let fixtures = self.read();
        Ok(fixtures
            .mutations
            .iter()
            .filter(|m| m.molecular_profile_id == molecular_profile_id)
            .filter(|m| entrez_gene_ids.contains(&m.gene.entrez_gene_id))
            .filter(|m| fixtures.admits(filter, &m.sample_id))
            .cloned()
            .collect())
    }

    async fn fetch_molecular_data(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
        entrez_gene_ids: &[i64],
    ) -> Result<Vec<GeneMolecularData>> {
        self.enter(Operation::MolecularData, molecular_profile_id).await?;
        let fixtures = self.read();
        Ok(fixtures
            .molecular_data
            .iter()
            .filter(|d| d.molecular_profile_id == molecular_profile_id)
            .filter(|d| entrez_gene_ids.contains(&d.gene.entrez_gene_id))
            .filter(|d| fixtures.admits(filter, &d.sample_id))
            .cloned()
            .collect())
    }

    async fn fetch_discrete_copy_number_data(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
    ) -> Result<Vec<DiscreteCopyNumberData>> {
        self.enter(Operation::DiscreteCopyNumberData, molecular_profile_id).await?;
        let fixtures = self.read();
        Ok(fixtures
            .discrete_cna
            .iter()
            .filter(|d| d.molecular_profile_id == molecular_profile_id)
            .filter(|d| fixtures.admits(filter, &d.sample_id))
            .cloned()
            .collect())
    }
}
