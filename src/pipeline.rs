//! Alteration fetch, merge, filter and projection.
//!
//! Mutations arrive per gene from the gene stores; every other alteration is
//! fetched in one batch per selected non-mutation profile. Both are merged by
//! gene symbol, filtered with the query expression and projected onto the
//! resolved sample list.

use std::collections::BTreeMap;

use futures::future::try_join_all;

use crate::model::{
    AlterationRecord, DataQueryFilter, DiscreteCopyNumberData, Gene, GeneMolecularData, MolecularProfile,
    Mutation, Sample,
};
use crate::oql::{AlterationFilter, ProfileAccessors};
use crate::service::{DataService, Result};

/// Gene symbol → records of that gene.
pub type AlterationsByGene = BTreeMap<String, Vec<AlterationRecord>>;

/// How genes with mutations but without non-mutation records are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Such genes end up with an empty list and lose their mutations.
    #[default]
    Source,
    /// Such genes keep their mutations.
    KeepMutations,
}

/// Fetches the values of every selected non-mutation profile for `genes`,
/// scoped by the data query filter of the profile's study, and concatenates
/// them in profile order.
///
/// Profiles of studies without a data query filter are skipped.
pub async fn fetch_non_mutation_data(
    service: &dyn DataService,
    profiles: &[MolecularProfile],
    filters: &BTreeMap<String, DataQueryFilter>,
    genes: &[Gene],
) -> Result<Vec<GeneMolecularData>> {
    let entrez_gene_ids: Vec<i64> = genes.iter().map(|g| g.entrez_gene_id).collect();

    let requests = profiles
        .iter()
        .filter(|profile| !profile.is_mutation_profile())
        .filter_map(move |profile| match filters.get(&profile.study_id) {
            Some(filter) => Some((profile, filter)),
            None => {
                tracing::debug!(profile = %profile.molecular_profile_id, "no samples queried in study, skipping");
                None
            }
        });

    let batches = try_join_all(requests.map(|(profile, filter)| {
        service.fetch_molecular_data(&profile.molecular_profile_id, filter, &entrez_gene_ids)
    }))
    .await?;

    Ok(batches.into_iter().flatten().collect())
}

/// Fetches discrete copy-number data for every study that has both a
/// canonical discrete profile and a data query filter.
pub async fn fetch_discrete_cna_data(
    service: &dyn DataService,
    study_ids: &[String],
    discrete_profiles: &BTreeMap<String, MolecularProfile>,
    filters: &BTreeMap<String, DataQueryFilter>,
) -> Result<Vec<DiscreteCopyNumberData>> {
    let requests = study_ids.iter().filter_map(move |study_id| {
        let profile = discrete_profiles.get(study_id)?;
        let filter = filters.get(study_id)?;
        Some(service.fetch_discrete_copy_number_data(&profile.molecular_profile_id, filter))
    });

    let batches = try_join_all(requests).await?;
    Ok(batches.into_iter().flatten().collect())
}

/// Groups raw values by gene symbol and types them by the alteration type of
/// their profile, keeping their relative order.
///
/// Every gene with at least one returned value gets an entry, even when none
/// of its values could be typed. Values of unknown profiles, of profiles
/// without a typed record and values that do not parse are dropped.
pub fn group_molecular_data_by_gene(data: &[GeneMolecularData], profiles: &[MolecularProfile]) -> AlterationsByGene {
    let profiles: BTreeMap<&str, &MolecularProfile> = profiles
        .iter()
        .map(|p| (p.molecular_profile_id.as_str(), p))
        .collect();

    let mut groups = AlterationsByGene::new();
    let mut dropped = 0;

    for datum in data {
        let records = groups.entry(datum.gene.hugo_gene_symbol.clone()).or_default();

        let record = profiles
            .get(datum.molecular_profile_id.as_str())
            .and_then(|profile| AlterationRecord::from_molecular_data(datum, profile));

        match record {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, "dropped untyped molecular data");
    }

    groups
}

/// Merges each gene's mutations with its non-mutation records, mutations
/// first. Only genes present in `mutations` appear in the result.
pub fn merge_alterations_by_gene(
    mutations: &BTreeMap<String, Vec<Mutation>>,
    non_mutation: &AlterationsByGene,
    policy: MergePolicy,
) -> AlterationsByGene {
    mutations
        .iter()
        .map(|(gene, mutations)| {
            let others = non_mutation.get(gene);

            let merged = match (others, policy) {
                (None, MergePolicy::Source) => vec![],
                (others, _) => mutations
                    .iter()
                    .cloned()
                    .map(AlterationRecord::Mutation)
                    .chain(others.into_iter().flatten().cloned())
                    .collect(),
            };

            (gene.clone(), merged)
        })
        .collect()
}

/// Applies the query expression to every gene's records.
pub fn filter_alterations(
    merged: &AlterationsByGene,
    filter: &dyn AlterationFilter,
    query: &str,
    accessors: &ProfileAccessors,
    default_query: &str,
) -> AlterationsByGene {
    merged
        .iter()
        .map(|(gene, records)| {
            let kept = filter.filter(query, records.clone(), accessors, default_query);
            (gene.clone(), kept)
        })
        .collect()
}

/// Gene symbol → sample id of every kept record, in record order.
pub fn sample_id_arrays(filtered: &AlterationsByGene) -> BTreeMap<String, Vec<String>> {
    filtered
        .iter()
        .map(|(gene, records)| {
            let ids = records.iter().map(|r| r.sample_id().to_owned()).collect();
            (gene.clone(), ids)
        })
        .collect()
}

/// Gene symbol → one flag per resolved sample, in sample order, set when the
/// sample id carries a kept record of the gene.
///
/// Samples are matched by sample id only.
pub fn sample_altered_map(
    sample_ids: &BTreeMap<String, Vec<String>>,
    samples: &[Sample],
) -> BTreeMap<String, Vec<bool>> {
    sample_ids
        .iter()
        .map(|(gene, ids)| {
            let flags = samples
                .iter()
                .map(|sample| ids.contains(&sample.sample_id))
                .collect();
            (gene.clone(), flags)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlterationType, ProfileDatum};
    use crate::oql::TokenFilter;
    use crate::service::{MockDataService, Operation};

    fn gene(symbol: &str, entrez: i64) -> Gene {
        Gene {
            entrez_gene_id: entrez,
            hugo_gene_symbol: symbol.into(),
        }
    }

    fn mutation(symbol: &str, sample: &str) -> Mutation {
        Mutation {
            molecular_profile_id: "brca_mutations".into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: gene(symbol, 1),
            protein_change: "V600E".into(),
            mutation_type: "Missense_Mutation".into(),
            mutation_status: "Somatic".into(),
        }
    }

    fn cna(symbol: &str, sample: &str, call: i32) -> AlterationRecord {
        AlterationRecord::CopyNumberEvent(ProfileDatum {
            molecular_profile_id: "brca_gistic".into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: gene(symbol, 2),
            value: call,
        })
    }

    fn profile(id: &str, study: &str, kind: AlterationType) -> MolecularProfile {
        MolecularProfile {
            molecular_profile_id: id.into(),
            study_id: study.into(),
            molecular_alteration_type: kind,
            datatype: String::new(),
            name: String::new(),
        }
    }

    fn sample(id: &str) -> Sample {
        Sample {
            study_id: "brca".into(),
            sample_id: id.into(),
            patient_id: String::new(),
        }
    }

    fn fixture() -> (BTreeMap<String, Vec<Mutation>>, AlterationsByGene) {
        let mutations = BTreeMap::from([
            ("geneA".to_string(), vec![mutation("geneA", "m1")]),
            ("geneC".to_string(), vec![mutation("geneC", "m3")]),
        ]);
        let others = BTreeMap::from([
            ("geneA".to_string(), vec![cna("geneA", "c1", 2)]),
            ("geneB".to_string(), vec![cna("geneB", "c2", -2)]),
        ]);
        (mutations, others)
    }

    #[test]
    fn test_merge_preserves_source_asymmetry() {
        let (mutations, others) = fixture();
        let merged = merge_alterations_by_gene(&mutations, &others, MergePolicy::Source);

        let a: Vec<_> = merged["geneA"].iter().map(|r| r.sample_id()).collect();
        assert_eq!(a, vec!["m1", "c1"]);
        assert!(matches!(merged["geneA"][0], AlterationRecord::Mutation(_)));

        assert!(merged["geneC"].is_empty());
        assert!(!merged.contains_key("geneB"));
    }

    #[test]
    fn test_merge_keep_mutations() {
        let (mutations, others) = fixture();
        let merged = merge_alterations_by_gene(&mutations, &others, MergePolicy::KeepMutations);

        assert_eq!(merged["geneA"].len(), 2);
        assert_eq!(merged["geneC"].len(), 1);
        assert_eq!(merged["geneC"][0].sample_id(), "m3");
        assert!(!merged.contains_key("geneB"));
    }

    #[test]
    fn test_filter_and_project() {
        let (mutations, others) = fixture();
        let merged = merge_alterations_by_gene(&mutations, &others, MergePolicy::Source);
        let accessors = ProfileAccessors::new(&[profile("brca_gistic", "brca", AlterationType::CopyNumberAlteration)]);

        let filtered = filter_alterations(&merged, &TokenFilter, "", &accessors, "AMP");
        let ids = sample_id_arrays(&filtered);
        assert_eq!(ids["geneA"], vec!["c1"]);
        assert!(ids["geneC"].is_empty());

        let samples = vec![sample("m1"), sample("c1"), sample("x")];
        let altered = sample_altered_map(&ids, &samples);
        assert_eq!(altered["geneA"], vec![false, true, false]);
        assert_eq!(altered["geneC"], vec![false, false, false]);
    }

    #[test]
    fn test_altered_map_follows_sample_order() {
        let ids = BTreeMap::from([("TP53".to_string(), vec!["s3".to_string(), "s1".to_string()])]);
        let samples = vec![sample("s1"), sample("s2"), sample("s3"), sample("s4")];

        let altered = sample_altered_map(&ids, &samples);
        assert_eq!(altered["TP53"], vec![true, false, true, false]);
        assert_eq!(altered["TP53"].len(), samples.len());
    }

    #[test]
    fn test_grouping_keeps_genes_without_typed_values() {
        let raw = |profile: &str, symbol: &str, value: &str| GeneMolecularData {
            molecular_profile_id: profile.into(),
            study_id: "brca".into(),
            sample_id: "s1".into(),
            gene: gene(symbol, 1),
            value: value.into(),
        };
        let profiles = vec![
            profile("brca_mrna", "brca", AlterationType::MrnaExpression),
            profile("brca_methylation", "brca", AlterationType::Methylation),
        ];

        let grouped = group_molecular_data_by_gene(
            &[
                raw("brca_mrna", "ERBB2", "2.1"),
                raw("brca_mrna", "ERBB2", "NA"),
                raw("brca_rppa", "ERBB2", "1.0"),
                raw("brca_mrna", "TP53", "NaN"),
                raw("brca_methylation", "PTEN", "0.8"),
            ],
            &profiles,
        );

        assert_eq!(grouped["ERBB2"].len(), 1);
        assert!(matches!(grouped["ERBB2"][0], AlterationRecord::ExpressionDatum(_)));
        assert!(grouped["TP53"].is_empty());
        assert!(grouped["PTEN"].is_empty());

        let mutations = BTreeMap::from([
            ("TP53".to_string(), vec![mutation("TP53", "s1")]),
            ("PTEN".to_string(), vec![mutation("PTEN", "s2")]),
        ]);
        let merged = merge_alterations_by_gene(&mutations, &grouped, MergePolicy::Source);
        assert_eq!(merged["TP53"].len(), 1);
        assert_eq!(merged["PTEN"][0].sample_id(), "s2");
    }

    #[tokio::test]
    async fn test_non_mutation_fetch_per_profile() {
        let mock = MockDataService::new();
        for (profile, value) in [("brca_mrna", "2.5"), ("luad_mrna", "-3"), ("brca_mrna", "0.1")] {
            mock.add_molecular_data(GeneMolecularData {
                molecular_profile_id: profile.into(),
                study_id: profile.split('_').next().unwrap_or_default().into(),
                sample_id: "s1".into(),
                gene: gene("ERBB2", 2064),
                value: value.into(),
            });
        }

        let profiles = vec![
            profile("brca_mutations", "brca", AlterationType::MutationExtended),
            profile("brca_mrna", "brca", AlterationType::MrnaExpression),
            profile("luad_mrna", "luad", AlterationType::MrnaExpression),
            profile("gbm_mrna", "gbm", AlterationType::MrnaExpression),
        ];
        let filters = BTreeMap::from([
            ("brca".to_string(), DataQueryFilter::SampleIds(vec!["s1".into()])),
            ("luad".to_string(), DataQueryFilter::SampleIds(vec!["s1".into()])),
        ]);

        let data = fetch_non_mutation_data(&mock, &profiles, &filters, &[gene("ERBB2", 2064)])
            .await
            .unwrap();

        let values: Vec<_> = data.iter().map(|d| d.value.as_str()).collect();
        assert_eq!(values, vec!["2.5", "0.1", "-3"]);
        assert_eq!(mock.calls(Operation::MolecularData), 2);
    }

    #[tokio::test]
    async fn test_discrete_cna_requires_profile_and_filter() {
        let mock = MockDataService::new();
        mock.add_discrete_cna(DiscreteCopyNumberData {
            molecular_profile_id: "brca_gistic".into(),
            study_id: "brca".into(),
            sample_id: "s1".into(),
            gene: gene("ERBB2", 2064),
            alteration: 2,
        });

        let studies = vec!["brca".to_string(), "luad".to_string()];
        let discrete = BTreeMap::from([
            ("brca".to_string(), profile("brca_gistic", "brca", AlterationType::CopyNumberAlteration)),
            ("luad".to_string(), profile("luad_gistic", "luad", AlterationType::CopyNumberAlteration)),
        ]);
        let filters = BTreeMap::from([("brca".to_string(), DataQueryFilter::SampleIds(vec!["s1".into()]))]);

        let data = fetch_discrete_cna_data(&mock, &studies, &discrete, &filters).await.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(mock.calls(Operation::DiscreteCopyNumberData), 1);
    }
}
