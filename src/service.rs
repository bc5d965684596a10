//! Access to the remote genomics data service.
//!
//! The pipeline only ever talks to the service through [`DataService`], so
//! tests and local development can swap in [`MockDataService`].

mod mock;

pub use mock::{MockDataService, Operation};

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::model::{
    CancerStudy, ClinicalData, DataQueryFilter, DiscreteCopyNumberData, Gene, GeneMolecularData,
    MolecularProfile, Mutation, Sample, SampleIdentifier,
};

pub type Result<T> = std::result::Result<T, ServiceError>;

/// The remote data service.
///
/// Every batched call either returns the complete batch or fails as a whole.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn fetch_molecular_profile(&self, molecular_profile_id: &str) -> Result<MolecularProfile>;

    async fn fetch_molecular_profiles_in_study(&self, study_id: &str) -> Result<Vec<MolecularProfile>>;

    /// Fetches the detailed sample records for a batch of identifiers.
    async fn fetch_samples(&self, identifiers: &[SampleIdentifier]) -> Result<Vec<Sample>>;

    /// Returns the members of a server-side sample list.
    async fn fetch_sample_ids_in_list(&self, sample_list_id: &str) -> Result<Vec<String>>;

    /// Fetches sample-level clinical data for the given attributes.
    async fn fetch_clinical_data(
        &self,
        attribute_ids: &[String],
        identifiers: &[SampleIdentifier],
    ) -> Result<Vec<ClinicalData>>;

    /// Looks genes up by HUGO symbol.
    async fn fetch_genes(&self, hugo_gene_symbols: &[String]) -> Result<Vec<Gene>>;

    async fn fetch_study(&self, study_id: &str) -> Result<CancerStudy>;

    async fn fetch_mutations(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
        entrez_gene_ids: &[i64],
    ) -> Result<Vec<Mutation>>;

    /// Fetches the values of a non-mutation profile.
    async fn fetch_molecular_data(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
        entrez_gene_ids: &[i64],
    ) -> Result<Vec<GeneMolecularData>>;

    async fn fetch_discrete_copy_number_data(
        &self,
        molecular_profile_id: &str,
        filter: &DataQueryFilter,
    ) -> Result<Vec<DiscreteCopyNumberData>>;
}
