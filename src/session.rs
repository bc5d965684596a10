//! The query session: every node of the results view wired into one graph.
//!
//! A [`QuerySession`] owns the graph, its error sink, the auxiliary caches
//! and the gene store registry. Root inputs (the sample specification, the
//! selected profiles, the query expression, thresholds and merge policy) are
//! replaced through setters; everything else is derived.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{DiscreteCnaCache, MutationDataCache};
use crate::core::Settings;
use crate::engine::{Graph, Input, Node, SinkEntry};
use crate::error::SettingsError;
use crate::gene_store::{GeneStore, GeneStoreRegistry, Upstream};
use crate::model::{
    CancerStudy, ClinicalData, DataQueryFilter, DiscreteCopyNumberData, Gene, GeneMolecularData, MolecularProfile,
    Mutation, QuerySpecification, Sample, SampleIdentifier,
};
use crate::oql::{self, AlterationFilter, ProfileAccessors, TokenFilter};
use crate::pipeline::{self, AlterationsByGene, MergePolicy};
use crate::resolve::{self, StudySamples};
use crate::service::DataService;

/// Handles to every derived node of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionNodes {
    pub selected_molecular_profiles: Node<Vec<MolecularProfile>>,
    pub genes: Node<Vec<Gene>>,
    pub study_to_sample_ids: Node<StudySamples>,
    pub study_to_sample_list_id: Node<BTreeMap<String, String>>,
    pub study_ids: Node<Vec<String>>,
    pub samples: Node<Vec<Sample>>,
    pub studies: Node<Vec<CancerStudy>>,
    pub molecular_profiles_in_studies: Node<Vec<MolecularProfile>>,
    pub molecular_profile_id_to_molecular_profile: Node<BTreeMap<String, MolecularProfile>>,
    pub study_to_mutation_molecular_profile: Node<BTreeMap<String, MolecularProfile>>,
    pub study_to_molecular_profile_discrete: Node<BTreeMap<String, MolecularProfile>>,
    pub study_to_data_query_filter: Node<BTreeMap<String, DataQueryFilter>>,
    pub clinical_data_for_samples: Node<Vec<ClinicalData>>,
    pub samples_without_cancer_type_clinical_data: Node<Vec<Sample>>,
    pub studies_for_samples_without_cancer_type_clinical_data: Node<Vec<CancerStudy>>,
    pub germline_consented_samples: Node<Vec<SampleIdentifier>>,
    pub discrete_cna_data: Node<Vec<DiscreteCopyNumberData>>,
    pub all_mutations: Node<BTreeMap<String, Vec<Mutation>>>,
    pub genetic_data: Node<Vec<GeneMolecularData>>,
    pub default_oql_query: Node<String>,
    pub filtered_alterations: Node<AlterationsByGene>,
    pub filtered_alterations_as_sample_id_arrays: Node<BTreeMap<String, Vec<String>>>,
    pub is_sample_altered_map: Node<BTreeMap<String, Vec<bool>>>,
}

#[derive(Clone, Copy)]
struct Inputs {
    samples_specification: Input<QuerySpecification>,
    selected_molecular_profile_ids: Input<Vec<String>>,
    oql_query: Input<String>,
    z_score_threshold: Input<f64>,
    rppa_score_threshold: Input<f64>,
    merge_policy: Input<MergePolicy>,
}

/// A results-view query session.
///
/// The gene list is fixed for the lifetime of the session; one gene store is
/// created per gene while the session is wired.
pub struct QuerySession {
    graph: Graph,
    inputs: Inputs,
    nodes: SessionNodes,
    registry: GeneStoreRegistry,
    discrete_cna_cache: DiscreteCnaCache,
    mutation_data_cache: MutationDataCache,
}

impl QuerySession {
    /// Creates a session that evaluates query expressions with
    /// [`TokenFilter`].
    pub fn new(
        service: Arc<dyn DataService>,
        settings: Settings,
        hugo_gene_symbols: &[String],
    ) -> Result<Self, SettingsError> {
        Self::with_filter(service, settings, hugo_gene_symbols, Arc::new(TokenFilter))
    }

    pub fn with_filter(
        service: Arc<dyn DataService>,
        settings: Settings,
        hugo_gene_symbols: &[String],
        filter: Arc<dyn AlterationFilter>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let graph = Graph::new();
        let discrete_cna_cache = DiscreteCnaCache::new();
        let mutation_data_cache = MutationDataCache::new();

        let mut symbols: Vec<String> = vec![];
        for symbol in hugo_gene_symbols {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }

        let inputs = Inputs {
            samples_specification: graph.input("samples_specification", QuerySpecification::new()),
            selected_molecular_profile_ids: graph.input("selected_molecular_profile_ids", Vec::<String>::new()),
            oql_query: graph.input("oql_query", String::new()),
            z_score_threshold: graph.input("z_score_threshold", settings.z_score_threshold),
            rppa_score_threshold: graph.input("rppa_score_threshold", settings.rppa_score_threshold),
            merge_policy: graph.input("merge_policy", MergePolicy::default()),
        };

        let selected_molecular_profiles = {
            let service = service.clone();
            graph
                .node()
                .name("selected_molecular_profiles")
                .depends_on(inputs.selected_molecular_profile_ids)
                .default(vec![])
                .run(move |ids| {
                    let service = service.clone();
                    async move { Ok(resolve::fetch_selected_profiles(&*service, &ids).await?) }
                })
        };

        let genes = {
            let service = service.clone();
            let symbols = symbols.clone();
            graph
                .node()
                .name("genes")
                .depends_on(())
                .default(vec![])
                .run(move |()| {
                    let service = service.clone();
                    let symbols = symbols.clone();
                    async move { Ok(resolve::fetch_genes(&*service, &symbols).await?) }
                })
        };

        let study_to_sample_ids = {
            let service = service.clone();
            graph
                .node()
                .name("study_to_sample_ids")
                .depends_on(inputs.samples_specification)
                .default(StudySamples::new())
                .run(move |spec| {
                    let service = service.clone();
                    async move { Ok(resolve::study_to_sample_ids(&*service, &spec).await?) }
                })
        };

        let study_to_sample_list_id = graph
            .node()
            .name("study_to_sample_list_id")
            .depends_on(inputs.samples_specification)
            .default(BTreeMap::new())
            .run(|spec| {
                let lists = resolve::study_to_sample_list_id(&spec);
                async move { Ok(lists) }
            });

        let study_ids = graph
            .node()
            .name("study_ids")
            .depends_on(study_to_sample_ids)
            .default(vec![])
            .run(|samples| {
                let ids: Vec<String> = samples.keys().cloned().collect();
                async move { Ok(ids) }
            });

        let samples = {
            let service = service.clone();
            graph
                .node()
                .name("samples")
                .depends_on(study_to_sample_ids)
                .default(vec![])
                .run(move |ids| {
                    let service = service.clone();
                    async move { Ok(resolve::fetch_samples(&*service, &ids).await?) }
                })
        };

        let studies = {
            let service = service.clone();
            graph
                .node()
                .name("studies")
                .depends_on(study_ids)
                .default(vec![])
                .run(move |ids| {
                    let service = service.clone();
                    async move { Ok(resolve::fetch_studies(&*service, &ids).await?) }
                })
        };

        let molecular_profiles_in_studies = {
            let service = service.clone();
            graph
                .node()
                .name("molecular_profiles_in_studies")
                .depends_on(study_ids)
                .default(vec![])
                .run(move |ids| {
                    let service = service.clone();
                    async move { Ok(resolve::fetch_molecular_profiles_in_studies(&*service, &ids).await?) }
                })
        };

        let molecular_profile_id_to_molecular_profile = graph
            .node()
            .name("molecular_profile_id_to_molecular_profile")
            .depends_on(molecular_profiles_in_studies)
            .default(BTreeMap::new())
            .run(|profiles| {
                let map = resolve::profile_map(&profiles);
                async move { Ok(map) }
            });

        let study_to_mutation_molecular_profile = graph
            .node()
            .name("study_to_mutation_molecular_profile")
            .depends_on(molecular_profiles_in_studies)
            .default(BTreeMap::new())
            .run(|profiles| {
                let map = resolve::study_to_mutation_profile(&profiles);
                async move { Ok(map) }
            });

        let study_to_molecular_profile_discrete = graph
            .node()
            .name("study_to_molecular_profile_discrete")
            .depends_on(molecular_profiles_in_studies)
            .default(BTreeMap::new())
            .run(|profiles| {
                let map = resolve::study_to_discrete_profile(&profiles);
                async move { Ok(map) }
            });

        let study_to_data_query_filter = graph
            .node()
            .name("study_to_data_query_filter")
            .depends_on((study_to_sample_ids, study_to_sample_list_id))
            .default(BTreeMap::new())
            .run(|(samples, lists)| {
                let filters = resolve::study_to_data_query_filter(&samples, &lists);
                async move { Ok(filters) }
            });

        let clinical_data_for_samples = {
            let service = service.clone();
            let attributes = settings.cancer_type_attribute_ids.clone();
            graph
                .node()
                .name("clinical_data_for_samples")
                .depends_on(samples)
                .default(vec![])
                .on_error(|error| tracing::debug!(%error, "clinical data unavailable"))
                .run(move |samples| {
                    let service = service.clone();
                    let attributes = attributes.clone();
                    async move { Ok(resolve::fetch_clinical_data(&*service, &attributes, &samples).await?) }
                })
        };

        let samples_without_cancer_type_clinical_data = graph
            .node()
            .name("samples_without_cancer_type_clinical_data")
            .depends_on((samples, clinical_data_for_samples))
            .default(vec![])
            .run(|(samples, clinical)| {
                let missing = resolve::samples_without_clinical_data(&samples, &clinical);
                async move { Ok(missing) }
            });

        let studies_for_samples_without_cancer_type_clinical_data = {
            let service = service.clone();
            graph
                .node()
                .name("studies_for_samples_without_cancer_type_clinical_data")
                .depends_on(samples_without_cancer_type_clinical_data)
                .default(vec![])
                .on_error(|error| tracing::debug!(%error, "studies of samples without cancer type unavailable"))
                .run(move |samples| {
                    let service = service.clone();
                    let ids = resolve::study_ids_of(&samples);
                    async move { Ok(resolve::fetch_studies(&*service, &ids).await?) }
                })
        };

        let germline_consented_samples = {
            let service = service.clone();
            let suffix = settings.germline_sample_list_suffix.clone();
            graph
                .node()
                .name("germline_consented_samples")
                .depends_on(study_ids)
                .default(vec![])
                .run(move |ids| {
                    let service = service.clone();
                    let suffix = suffix.clone();
                    async move { Ok(resolve::fetch_germline_consented_samples(&*service, &ids, &suffix).await) }
                })
        };

        let discrete_cna_data = {
            let service = service.clone();
            let cache = discrete_cna_cache.clone();
            graph
                .node()
                .name("discrete_cna_data")
                .depends_on((study_ids, study_to_molecular_profile_discrete, study_to_data_query_filter))
                .default(vec![])
                .on_result(move |data: &Vec<DiscreteCopyNumberData>| {
                    cache.add_data(data);
                })
                .run(move |(ids, profiles, filters)| {
                    let service = service.clone();
                    async move { Ok(pipeline::fetch_discrete_cna_data(&*service, &ids, &profiles, &filters).await?) }
                })
        };

        let registry = GeneStoreRegistry::new(
            graph.clone(),
            service.clone(),
            Upstream {
                genes,
                samples,
                study_to_mutation_profile: study_to_mutation_molecular_profile,
                study_to_data_query_filter,
                clinical_data: clinical_data_for_samples,
                studies_without_cancer_type: studies_for_samples_without_cancer_type_clinical_data,
                germline_consented_samples,
            },
            mutation_data_cache.clone(),
            settings
                .cancer_type_attribute_ids
                .first()
                .cloned()
                .unwrap_or_default(),
            &symbols,
        );

        let stores: Vec<Arc<GeneStore>> = symbols
            .iter()
            .filter_map(|symbol| registry.get_or_create(symbol))
            .collect();

        let all_mutations = {
            let symbols: Vec<String> = stores.iter().map(|s| s.hugo_gene_symbol().to_owned()).collect();
            graph
                .node()
                .name("all_mutations")
                .depends_on(stores.iter().map(|s| s.mutation_data()).collect::<Vec<_>>())
                .default(BTreeMap::new())
                .run(move |per_gene| {
                    let map: BTreeMap<String, Vec<Mutation>> = symbols
                        .iter()
                        .cloned()
                        .zip(per_gene.iter().map(|mutations| mutations.as_ref().clone()))
                        .collect();
                    async move { Ok(map) }
                })
        };

        let genetic_data = {
            let service = service.clone();
            graph
                .node()
                .name("genetic_data")
                .depends_on((study_to_data_query_filter, genes, selected_molecular_profiles))
                .default(vec![])
                .run(move |(filters, genes, profiles)| {
                    let service = service.clone();
                    async move { Ok(pipeline::fetch_non_mutation_data(&*service, &profiles, &filters, &genes).await?) }
                })
        };

        let default_oql_query = graph
            .node()
            .name("default_oql_query")
            .depends_on((
                selected_molecular_profiles,
                inputs.z_score_threshold,
                inputs.rppa_score_threshold,
            ))
            .default(String::new())
            .run(|(profiles, z, rppa)| {
                let types = profiles.iter().map(|p| p.molecular_alteration_type);
                let query = oql::default_oql_query(types, *z, *rppa);
                async move { Ok(query) }
            });

        let filtered_alterations = graph
            .node()
            .name("filtered_alterations")
            .depends_on((
                all_mutations,
                selected_molecular_profiles,
                genetic_data,
                default_oql_query,
                inputs.oql_query,
                inputs.merge_policy,
            ))
            .default(AlterationsByGene::new())
            .run(move |(mutations, profiles, data, default_query, query, policy)| {
                let grouped = pipeline::group_molecular_data_by_gene(&data, &profiles);
                let merged = pipeline::merge_alterations_by_gene(&mutations, &grouped, *policy);
                let accessors = ProfileAccessors::new(profiles.iter());
                let filtered = pipeline::filter_alterations(&merged, &*filter, &query, &accessors, &default_query);
                async move { Ok(filtered) }
            });

        let filtered_alterations_as_sample_id_arrays = graph
            .node()
            .name("filtered_alterations_as_sample_id_arrays")
            .depends_on(filtered_alterations)
            .default(BTreeMap::new())
            .run(|filtered| {
                let ids = pipeline::sample_id_arrays(&filtered);
                async move { Ok(ids) }
            });

        let is_sample_altered_map = graph
            .node()
            .name("is_sample_altered_map")
            .depends_on((filtered_alterations_as_sample_id_arrays, samples))
            .default(BTreeMap::new())
            .run(|(ids, samples)| {
                let altered = pipeline::sample_altered_map(&ids, &samples);
                async move { Ok(altered) }
            });

        tracing::info!(genes = symbols.len(), nodes = graph.len(), "query session wired");

        Ok(Self {
            graph,
            inputs,
            nodes: SessionNodes {
                selected_molecular_profiles,
                genes,
                study_to_sample_ids,
                study_to_sample_list_id,
                study_ids,
                samples,
                studies,
                molecular_profiles_in_studies,
                molecular_profile_id_to_molecular_profile,
                study_to_mutation_molecular_profile,
                study_to_molecular_profile_discrete,
                study_to_data_query_filter,
                clinical_data_for_samples,
                samples_without_cancer_type_clinical_data,
                studies_for_samples_without_cancer_type_clinical_data,
                germline_consented_samples,
                discrete_cna_data,
                all_mutations,
                genetic_data,
                default_oql_query,
                filtered_alterations,
                filtered_alterations_as_sample_id_arrays,
                is_sample_altered_map,
            },
            registry,
            discrete_cna_cache,
            mutation_data_cache,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn nodes(&self) -> &SessionNodes {
        &self.nodes
    }

    /// Replaces the queried samples. Returns whether anything changed.
    pub fn set_samples_specification(&self, specification: QuerySpecification) -> bool {
        self.graph.set(self.inputs.samples_specification, specification)
    }

    pub fn set_selected_molecular_profile_ids(&self, ids: Vec<String>) -> bool {
        self.graph.set(self.inputs.selected_molecular_profile_ids, ids)
    }

    pub fn set_oql_query(&self, query: impl Into<String>) -> bool {
        self.graph.set(self.inputs.oql_query, query.into())
    }

    pub fn set_z_score_threshold(&self, value: f64) -> Result<bool, SettingsError> {
        check_threshold("zScoreThreshold", value)?;
        Ok(self.graph.set(self.inputs.z_score_threshold, value))
    }

    pub fn set_rppa_score_threshold(&self, value: f64) -> Result<bool, SettingsError> {
        check_threshold("rppaScoreThreshold", value)?;
        Ok(self.graph.set(self.inputs.rppa_score_threshold, value))
    }

    pub fn set_merge_policy(&self, policy: MergePolicy) -> bool {
        self.graph.set(self.inputs.merge_policy, policy)
    }

    /// The store of a queried gene, `None` for any other gene.
    pub fn gene_store(&self, hugo_gene_symbol: &str) -> Option<Arc<GeneStore>> {
        self.registry.get_or_create(hugo_gene_symbol)
    }

    pub fn discrete_cna_cache(&self) -> &DiscreteCnaCache {
        &self.discrete_cna_cache
    }

    pub fn mutation_data_cache(&self) -> &MutationDataCache {
        &self.mutation_data_cache
    }

    /// Failures not handled by their node, oldest first.
    pub fn errors(&self) -> Vec<SinkEntry> {
        self.graph.sink().errors()
    }

    pub fn drain_errors(&self) -> Vec<SinkEntry> {
        self.graph.sink().drain_and_clear()
    }

    pub fn clear_errors(&self) {
        self.graph.sink().clear();
    }
}

fn check_threshold(name: &'static str, value: f64) -> Result<(), SettingsError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SettingsError::Threshold { name, value });
    }

    Ok(())
}
