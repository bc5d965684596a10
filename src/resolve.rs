//! Resolution of a query specification into studies, samples, molecular
//! profiles and per-study data query filters.
//!
//! The async helpers fan out one remote call per study or sample list and
//! wait for all of them. The pure helpers derive lookup tables from values
//! that were already fetched.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::{join_all, try_join_all};

use crate::model::{
    CancerStudy, ClinicalData, DataQueryFilter, Gene, MolecularProfile, QuerySpecification, Sample,
    SampleIdentifier, SampleSelector,
};
use crate::service::{DataService, Result};

/// Study id → queried sample ids.
pub type StudySamples = BTreeMap<String, BTreeSet<String>>;

/// Resolves the queried sample ids per study: explicit sample ids plus the
/// members of every referenced sample list.
pub async fn study_to_sample_ids(
    service: &dyn DataService,
    specification: &QuerySpecification,
) -> Result<StudySamples> {
    let mut samples = StudySamples::new();
    let mut lists = vec![];

    for spec in specification {
        match &spec.selector {
            SampleSelector::SampleId(id) => {
                samples.entry(spec.study_id.clone()).or_default().insert(id.clone());
            }
            SampleSelector::SampleListId(list) => lists.push((spec.study_id.as_str(), list.as_str())),
        }
    }

    let members = try_join_all(lists.iter().map(|(_, list)| service.fetch_sample_ids_in_list(list))).await?;

    for ((study_id, _), ids) in lists.iter().zip(members) {
        samples.entry(study_id.to_string()).or_default().extend(ids);
    }

    Ok(samples)
}

/// Study id → the sample list the study was queried with. When a study is
/// referenced through several lists the last one wins.
pub fn study_to_sample_list_id(specification: &QuerySpecification) -> BTreeMap<String, String> {
    specification
        .iter()
        .filter_map(|spec| match &spec.selector {
            SampleSelector::SampleListId(list) => Some((spec.study_id.clone(), list.clone())),
            SampleSelector::SampleId(_) => None,
        })
        .collect()
}

/// Fetches the sample records of every queried sample in one batch. Samples
/// are requested in study order, then sample id order.
pub async fn fetch_samples(service: &dyn DataService, samples: &StudySamples) -> Result<Vec<Sample>> {
    let identifiers: Vec<SampleIdentifier> = samples
        .iter()
        .flat_map(|(study_id, ids)| ids.iter().map(move |id| SampleIdentifier::new(study_id, id)))
        .collect();

    if identifiers.is_empty() {
        return Ok(vec![]);
    }

    service.fetch_samples(&identifiers).await
}

pub async fn fetch_studies(service: &dyn DataService, study_ids: &[String]) -> Result<Vec<CancerStudy>> {
    try_join_all(study_ids.iter().map(|id| service.fetch_study(id))).await
}

pub async fn fetch_molecular_profiles_in_studies(
    service: &dyn DataService,
    study_ids: &[String],
) -> Result<Vec<MolecularProfile>> {
    let profiles = try_join_all(
        study_ids
            .iter()
            .map(|id| service.fetch_molecular_profiles_in_study(id)),
    )
    .await?;

    Ok(profiles.into_iter().flatten().collect())
}

/// Fetches the selected profiles, keeping the selection order.
pub async fn fetch_selected_profiles(
    service: &dyn DataService,
    molecular_profile_ids: &[String],
) -> Result<Vec<MolecularProfile>> {
    try_join_all(
        molecular_profile_ids
            .iter()
            .map(|id| service.fetch_molecular_profile(id)),
    )
    .await
}

pub async fn fetch_genes(service: &dyn DataService, hugo_gene_symbols: &[String]) -> Result<Vec<Gene>> {
    if hugo_gene_symbols.is_empty() {
        return Ok(vec![]);
    }

    service.fetch_genes(hugo_gene_symbols).await
}

pub fn profile_map(profiles: &[MolecularProfile]) -> BTreeMap<String, MolecularProfile> {
    profiles
        .iter()
        .map(|p| (p.molecular_profile_id.clone(), p.clone()))
        .collect()
}

/// The first mutation profile of each study is canonical.
pub fn study_to_mutation_profile(profiles: &[MolecularProfile]) -> BTreeMap<String, MolecularProfile> {
    let mut map = BTreeMap::new();

    for profile in profiles.iter().filter(|p| p.is_mutation_profile()) {
        map.entry(profile.study_id.clone())
            .or_insert_with(|| profile.clone());
    }

    map
}

/// The last discrete profile of each study is canonical.
pub fn study_to_discrete_profile(profiles: &[MolecularProfile]) -> BTreeMap<String, MolecularProfile> {
    profiles
        .iter()
        .filter(|p| p.is_discrete())
        .map(|p| (p.study_id.clone(), p.clone()))
        .collect()
}

pub fn study_to_data_query_filter(
    samples: &StudySamples,
    sample_lists: &BTreeMap<String, String>,
) -> BTreeMap<String, DataQueryFilter> {
    samples
        .iter()
        .map(|(study_id, ids)| {
            let list = sample_lists.get(study_id).map(String::as_str);
            (study_id.clone(), DataQueryFilter::generate(list, ids))
        })
        .collect()
}

/// Fetches the cancer type attributes of every sample in one batch.
pub async fn fetch_clinical_data(
    service: &dyn DataService,
    attribute_ids: &[String],
    samples: &[Sample],
) -> Result<Vec<ClinicalData>> {
    if samples.is_empty() {
        return Ok(vec![]);
    }

    let identifiers: Vec<SampleIdentifier> = samples.iter().map(Sample::identifier).collect();
    service.fetch_clinical_data(attribute_ids, &identifiers).await
}

/// Samples for which no clinical data was returned.
pub fn samples_without_clinical_data(samples: &[Sample], clinical: &[ClinicalData]) -> Vec<Sample> {
    let covered: BTreeSet<(&str, &str)> = clinical
        .iter()
        .map(|d| (d.study_id.as_str(), d.entity_id.as_str()))
        .collect();

    samples
        .iter()
        .filter(|s| !covered.contains(&(s.study_id.as_str(), s.sample_id.as_str())))
        .cloned()
        .collect()
}

/// Distinct study ids of `samples`, in first-seen order.
pub fn study_ids_of(samples: &[Sample]) -> Vec<String> {
    let mut ids: Vec<String> = vec![];

    for sample in samples {
        if !ids.contains(&sample.study_id) {
            ids.push(sample.study_id.clone());
        }
    }

    ids
}

pub fn germline_sample_list_id(study_id: &str, suffix: &str) -> String {
    format!("{study_id}{suffix}")
}

/// Resolves the germline-consented samples of every study.
///
/// A study whose consent list is missing or cannot be fetched contributes no
/// samples. This never fails.
pub async fn fetch_germline_consented_samples(
    service: &dyn DataService,
    study_ids: &[String],
    suffix: &str,
) -> Vec<SampleIdentifier> {
    let lists: Vec<String> = study_ids
        .iter()
        .map(|id| germline_sample_list_id(id, suffix))
        .collect();

    let results = join_all(lists.iter().map(|list| service.fetch_sample_ids_in_list(list))).await;

    study_ids
        .iter()
        .zip(results)
        .flat_map(|(study_id, result)| {
            let ids = result.unwrap_or_else(|error| {
                tracing::debug!(study = %study_id, %error, "no germline consent list");
                vec![]
            });
            ids.into_iter()
                .map(move |id| SampleIdentifier::new(study_id, id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::model::{AlterationType, SampleSpec};
    use crate::service::{MockDataService, Operation};

    fn profile(id: &str, study: &str, kind: AlterationType, datatype: &str) -> MolecularProfile {
        MolecularProfile {
            molecular_profile_id: id.into(),
            study_id: study.into(),
            molecular_alteration_type: kind,
            datatype: datatype.into(),
            name: String::new(),
        }
    }

    #[tokio::test]
    async fn test_union_of_explicit_and_listed_samples() {
        let mock = MockDataService::new();
        mock.add_sample_list("brca_all", &["s1", "s2", "s3"]);
        mock.add_sample_list("luad_sub", &["l1"]);

        let spec = vec![
            SampleSpec::sample("brca", "s1"),
            SampleSpec::sample("brca", "s9"),
            SampleSpec::sample_list("brca", "brca_all"),
            SampleSpec::sample_list("luad", "luad_sub"),
            SampleSpec::sample("gbm", "g1"),
        ];

        let samples = study_to_sample_ids(&mock, &spec).await.unwrap();

        let brca: Vec<_> = samples["brca"].iter().map(String::as_str).collect();
        assert_eq!(brca, vec!["s1", "s2", "s3", "s9"]);
        assert_eq!(samples["luad"].len(), 1);
        assert_eq!(samples["gbm"].len(), 1);
        assert_eq!(mock.calls(Operation::SampleIdsInList), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_study_fetches_run_concurrently() {
        let latency = Duration::from_millis(50);
        let mock = MockDataService::new().with_latency(latency);
        let studies = ["brca", "luad", "gbm"];

        for study in studies {
            mock.add_sample_list(&format!("{study}_all"), &["x1", "x2"]);
            mock.add_profile(profile(&format!("{study}_mutations"), study, AlterationType::MutationExtended, "MAF"));
        }
        let spec: Vec<SampleSpec> = studies
            .iter()
            .map(|study| SampleSpec::sample_list(*study, format!("{study}_all")))
            .collect();

        let started = Instant::now();
        let samples = study_to_sample_ids(&mock, &spec).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(samples.len(), 3);
        assert!(elapsed >= latency && elapsed < latency * 2, "took {elapsed:?}");

        let study_ids: Vec<String> = samples.keys().cloned().collect();
        let started = Instant::now();
        let profiles = fetch_molecular_profiles_in_studies(&mock, &study_ids).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(profiles.len(), 3);
        assert!(elapsed >= latency && elapsed < latency * 2, "took {elapsed:?}");

        assert_eq!(mock.calls(Operation::SampleIdsInList), 3);
        assert_eq!(mock.calls(Operation::MolecularProfilesInStudy), 3);
    }

    #[tokio::test]
    async fn test_missing_sample_list_fails() {
        let mock = MockDataService::new();
        let spec = vec![SampleSpec::sample_list("brca", "brca_all")];
        assert!(study_to_sample_ids(&mock, &spec).await.is_err());
    }

    #[test]
    fn test_last_sample_list_wins() {
        let spec = vec![
            SampleSpec::sample_list("brca", "brca_a"),
            SampleSpec::sample("brca", "s1"),
            SampleSpec::sample_list("brca", "brca_b"),
        ];

        let lists = study_to_sample_list_id(&spec);
        assert_eq!(lists["brca"], "brca_b");
    }

    #[test]
    fn test_canonical_profiles() {
        let profiles = vec![
            profile("brca_mut", "brca", AlterationType::MutationExtended, "MAF"),
            profile("brca_mut2", "brca", AlterationType::MutationExtended, "MAF"),
            profile("brca_gistic", "brca", AlterationType::CopyNumberAlteration, "DISCRETE"),
            profile("brca_gistic2", "brca", AlterationType::CopyNumberAlteration, "DISCRETE"),
            profile("brca_log2", "brca", AlterationType::CopyNumberAlteration, "LOG2-VALUE"),
        ];

        let mutation = study_to_mutation_profile(&profiles);
        assert_eq!(mutation["brca"].molecular_profile_id, "brca_mut");

        let discrete = study_to_discrete_profile(&profiles);
        assert_eq!(discrete["brca"].molecular_profile_id, "brca_gistic2");

        assert_eq!(profile_map(&profiles).len(), 5);
    }

    #[test]
    fn test_data_query_filters() {
        let samples = StudySamples::from([
            ("brca".to_string(), BTreeSet::from(["s1".to_string()])),
            ("luad".to_string(), BTreeSet::from(["l1".to_string()])),
        ]);
        let lists = BTreeMap::from([("luad".to_string(), "luad_all".to_string())]);

        let filters = study_to_data_query_filter(&samples, &lists);
        assert_eq!(filters["brca"], DataQueryFilter::SampleIds(vec!["s1".into()]));
        assert_eq!(filters["luad"], DataQueryFilter::SampleListId("luad_all".into()));
    }

    #[test]
    fn test_samples_without_clinical_data() {
        let sample = |study: &str, id: &str| Sample {
            study_id: study.into(),
            sample_id: id.into(),
            patient_id: String::new(),
        };
        let samples = vec![sample("brca", "s1"), sample("brca", "s2"), sample("luad", "s1")];
        let clinical = vec![ClinicalData {
            study_id: "brca".into(),
            entity_id: "s1".into(),
            clinical_attribute_id: "CANCER_TYPE".into(),
            value: "Breast Cancer".into(),
        }];

        let missing = samples_without_clinical_data(&samples, &clinical);
        assert_eq!(missing, vec![sample("brca", "s2"), sample("luad", "s1")]);
        assert_eq!(study_ids_of(&missing), vec!["brca", "luad"]);
    }

    #[tokio::test]
    async fn test_germline_failures_are_isolated_per_study() {
        let mock = MockDataService::new();
        mock.add_sample_list("brca_germline", &["s1"]);
        mock.add_sample_list("luad_germline", &["l1", "l2"]);
        mock.fail(Operation::SampleIdsInList, "luad_germline");

        let studies = vec!["brca".to_string(), "luad".to_string(), "gbm".to_string()];
        let consented = fetch_germline_consented_samples(&mock, &studies, "_germline").await;

        assert_eq!(consented, vec![SampleIdentifier::new("brca", "s1")]);
        assert_eq!(mock.calls(Operation::SampleIdsInList), 3);
    }
}
