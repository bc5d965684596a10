//! Per-gene sub-graphs.
//!
//! A [`GeneStore`] holds the nodes scoped to a single gene: its mutations,
//! the germline-filtered view of them and the cancer type of every queried
//! sample. Stores are built on first use by a [`GeneStoreRegistry`] owned by
//! the query session and live as long as the session does.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::try_join_all;

use crate::cache::MutationDataCache;
use crate::engine::{Graph, Node};
use crate::model::{
    CancerStudy, ClinicalData, DataQueryFilter, Gene, MolecularProfile, Mutation, Sample, SampleIdentifier,
};
use crate::service::DataService;

/// The shared upstream nodes every gene store is parameterized by.
#[derive(Clone, Copy)]
pub(crate) struct Upstream {
    pub genes: Node<Vec<Gene>>,
    pub samples: Node<Vec<Sample>>,
    pub study_to_mutation_profile: Node<BTreeMap<String, MolecularProfile>>,
    pub study_to_data_query_filter: Node<BTreeMap<String, DataQueryFilter>>,
    pub clinical_data: Node<Vec<ClinicalData>>,
    pub studies_without_cancer_type: Node<Vec<CancerStudy>>,
    pub germline_consented_samples: Node<Vec<SampleIdentifier>>,
}

/// The nodes scoped to one gene.
#[derive(Debug)]
pub struct GeneStore {
    hugo_gene_symbol: String,
    mutation_data: Node<Vec<Mutation>>,
    germline_filtered_mutations: Node<Vec<Mutation>>,
    sample_cancer_types: Node<BTreeMap<SampleIdentifier, String>>,
}

impl GeneStore {
    pub fn hugo_gene_symbol(&self) -> &str {
        &self.hugo_gene_symbol
    }

    /// Mutations of the gene across the canonical mutation profiles of all
    /// queried studies.
    pub fn mutation_data(&self) -> Node<Vec<Mutation>> {
        self.mutation_data
    }

    /// The gene's mutations with germline calls of non-consented samples
    /// removed.
    pub fn germline_filtered_mutations(&self) -> Node<Vec<Mutation>> {
        self.germline_filtered_mutations
    }

    /// Cancer type of every queried sample.
    pub fn sample_cancer_types(&self) -> Node<BTreeMap<SampleIdentifier, String>> {
        self.sample_cancer_types
    }
}

/// Builds and memoizes one [`GeneStore`] per queried gene.
pub struct GeneStoreRegistry {
    graph: Graph,
    service: Arc<dyn DataService>,
    upstream: Upstream,
    mutation_cache: MutationDataCache,
    cancer_type_attribute: String,
    hugo_gene_symbols: BTreeSet<String>,
    stores: Mutex<HashMap<String, Arc<GeneStore>>>,
}

impl GeneStoreRegistry {
    pub(crate) fn new(
        graph: Graph,
        service: Arc<dyn DataService>,
        upstream: Upstream,
        mutation_cache: MutationDataCache,
        cancer_type_attribute: String,
        hugo_gene_symbols: &[String],
    ) -> Self {
        Self {
            graph,
            service,
            upstream,
            mutation_cache,
            cancer_type_attribute,
            hugo_gene_symbols: hugo_gene_symbols.iter().cloned().collect(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store of `hugo_gene_symbol`, building it on first use.
    ///
    /// Returns `None` for genes that are not part of the query. Repeated and
    /// concurrent calls for the same gene return the same store.
    pub fn get_or_create(&self, hugo_gene_symbol: &str) -> Option<Arc<GeneStore>> {
        if !self.hugo_gene_symbols.contains(hugo_gene_symbol) {
            return None;
        }

        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(hugo_gene_symbol) {
            return Some(store.clone());
        }

        tracing::debug!(gene = hugo_gene_symbol, "creating gene store");
        let store = Arc::new(self.build(hugo_gene_symbol));
        stores.insert(hugo_gene_symbol.to_owned(), store.clone());

        Some(store)
    }

    /// Stores built so far.
    pub fn len(&self) -> usize {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, symbol: &str) -> GeneStore {
        let up = self.upstream;

        let mutation_data = {
            let service = self.service.clone();
            let cache = self.mutation_cache.clone();
            let symbol = symbol.to_owned();

            self.graph
                .node()
                .name(format!("mutation_data[{symbol}]"))
                .depends_on((up.genes, up.study_to_mutation_profile, up.study_to_data_query_filter))
                .default(vec![])
                .on_result(move |mutations: &Vec<Mutation>| {
                    cache.add_data(mutations);
                })
                .run(move |(genes, profiles, filters)| {
                    let service = service.clone();
                    let symbol = symbol.clone();
                    async move {
                        let Some(gene) = genes.iter().find(|g| g.hugo_gene_symbol == symbol) else {
                            tracing::debug!(gene = %symbol, "gene unknown to the data service");
                            return Ok(vec![]);
                        };

                        let mutations = fetch_gene_mutations(&*service, gene, &profiles, &filters).await?;
                        Ok(mutations)
                    }
                })
        };

        let germline_filtered_mutations = self
            .graph
            .node()
            .name(format!("germline_filtered_mutations[{symbol}]"))
            .depends_on((mutation_data, up.germline_consented_samples))
            .default(vec![])
            .run(|(mutations, consented)| async move { Ok(filter_germline(&mutations, &consented)) });

        let sample_cancer_types = {
            let attribute = self.cancer_type_attribute.clone();

            self.graph
                .node()
                .name(format!("sample_cancer_types[{symbol}]"))
                .depends_on((up.samples, up.clinical_data, up.studies_without_cancer_type))
                .default(BTreeMap::new())
                .run(move |(samples, clinical, studies)| {
                    let map = cancer_types(&samples, &clinical, &studies, &attribute);
                    async move { Ok(map) }
                })
        };

        GeneStore {
            hugo_gene_symbol: symbol.to_owned(),
            mutation_data,
            germline_filtered_mutations,
            sample_cancer_types,
        }
    }
}

/// Fetches the mutations of `gene` from the canonical mutation profile of
/// every study that has one, one concurrent call per study.
pub async fn fetch_gene_mutations(
    service: &dyn DataService,
    gene: &Gene,
    mutation_profiles: &BTreeMap<String, MolecularProfile>,
    filters: &BTreeMap<String, DataQueryFilter>,
) -> crate::service::Result<Vec<Mutation>> {
    let entrez_gene_ids = [gene.entrez_gene_id];

    let requests = mutation_profiles.iter().filter_map(|(study_id, profile)| {
        let filter = filters.get(study_id)?;
        Some(service.fetch_mutations(&profile.molecular_profile_id, filter, &entrez_gene_ids))
    });

    let batches = try_join_all(requests).await?;
    Ok(batches.into_iter().flatten().collect())
}

/// Drops germline mutations of samples without germline consent.
pub fn filter_germline(mutations: &[Mutation], consented: &[SampleIdentifier]) -> Vec<Mutation> {
    let consented: BTreeSet<&SampleIdentifier> = consented.iter().collect();

    mutations
        .iter()
        .filter(|m| !m.is_germline() || consented.contains(&m.sample()))
        .cloned()
        .collect()
}

/// Cancer type per sample: the clinical value of `attribute` when present,
/// otherwise the cancer type of the sample's study.
pub fn cancer_types(
    samples: &[Sample],
    clinical: &[ClinicalData],
    studies: &[CancerStudy],
    attribute: &str,
) -> BTreeMap<SampleIdentifier, String> {
    let clinical: BTreeMap<(&str, &str), &str> = clinical
        .iter()
        .filter(|d| d.clinical_attribute_id == attribute)
        .map(|d| ((d.study_id.as_str(), d.entity_id.as_str()), d.value.as_str()))
        .collect();

    let studies: BTreeMap<&str, &str> = studies
        .iter()
        .map(|s| (s.study_id.as_str(), s.cancer_type.as_str()))
        .collect();

    samples
        .iter()
        .filter_map(|sample| {
            let key = (sample.study_id.as_str(), sample.sample_id.as_str());
            let cancer_type = clinical
                .get(&key)
                .or_else(|| studies.get(sample.study_id.as_str()))?;
            Some((sample.identifier(), cancer_type.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(sample: &str, status: &str) -> Mutation {
        Mutation {
            molecular_profile_id: "brca_mutations".into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: Gene {
                entrez_gene_id: 672,
                hugo_gene_symbol: "BRCA1".into(),
            },
            protein_change: "E1660fs".into(),
            mutation_type: "Frame_Shift_Del".into(),
            mutation_status: status.into(),
        }
    }

    fn sample(study: &str, id: &str) -> Sample {
        Sample {
            study_id: study.into(),
            sample_id: id.into(),
            patient_id: String::new(),
        }
    }

    #[test]
    fn test_germline_needs_consent() {
        let mutations = vec![
            mutation("s1", "Germline"),
            mutation("s2", "GERMLINE"),
            mutation("s2", "Somatic"),
            mutation("s3", ""),
        ];
        let consented = vec![SampleIdentifier::new("brca", "s1")];

        let kept = filter_germline(&mutations, &consented);
        let samples: Vec<_> = kept.iter().map(|m| (m.sample_id.as_str(), m.mutation_status.as_str())).collect();
        assert_eq!(samples, vec![("s1", "Germline"), ("s2", "Somatic"), ("s3", "")]);
    }

    #[test]
    fn test_cancer_type_falls_back_to_study() {
        let samples = vec![sample("brca", "s1"), sample("brca", "s2"), sample("gbm", "g1")];
        let clinical = vec![
            ClinicalData {
                study_id: "brca".into(),
                entity_id: "s1".into(),
                clinical_attribute_id: "CANCER_TYPE".into(),
                value: "Breast Cancer".into(),
            },
            ClinicalData {
                study_id: "brca".into(),
                entity_id: "s2".into(),
                clinical_attribute_id: "CANCER_TYPE_DETAILED".into(),
                value: "Invasive Ductal Carcinoma".into(),
            },
        ];
        let studies = vec![CancerStudy {
            study_id: "brca".into(),
            name: "Breast".into(),
            cancer_type: "Invasive Breast Carcinoma".into(),
        }];

        let types = cancer_types(&samples, &clinical, &studies, "CANCER_TYPE");
        assert_eq!(types[&SampleIdentifier::new("brca", "s1")], "Breast Cancer");
        assert_eq!(types[&SampleIdentifier::new("brca", "s2")], "Invasive Breast Carcinoma");
        assert!(!types.contains_key(&SampleIdentifier::new("gbm", "g1")));
    }
}
