//! Records exchanged with the remote data service and the alteration records
//! produced by the pipeline.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identifies a sample; sample ids are unique within a study only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleIdentifier {
    pub study_id: String,
    pub sample_id: String,
}

impl SampleIdentifier {
    pub fn new(study_id: impl Into<String>, sample_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            sample_id: sample_id.into(),
        }
    }
}

/// Either a single sample or a server-side sample list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleSelector {
    SampleId(String),
    SampleListId(String),
}

/// One element of a query specification.
///
/// Serialized as `{"studyId": .., "sampleId": ..}` or
/// `{"studyId": .., "sampleListId": ..}`, so an element can never carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSpec {
    pub study_id: String,
    #[serde(flatten)]
    pub selector: SampleSelector,
}

impl SampleSpec {
    pub fn sample(study_id: impl Into<String>, sample_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            selector: SampleSelector::SampleId(sample_id.into()),
        }
    }

    pub fn sample_list(study_id: impl Into<String>, sample_list_id: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            selector: SampleSelector::SampleListId(sample_list_id.into()),
        }
    }
}

/// The samples a query is about, in submission order.
pub type QuerySpecification = Vec<SampleSpec>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub study_id: String,
    pub sample_id: String,
    #[serde(default)]
    pub patient_id: String,
}

impl Sample {
    pub fn identifier(&self) -> SampleIdentifier {
        SampleIdentifier::new(&self.study_id, &self.sample_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancerStudy {
    pub study_id: String,
    pub name: String,
    /// Display name of the study's cancer type.
    pub cancer_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gene {
    pub entrez_gene_id: i64,
    pub hugo_gene_symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlterationType {
    MutationExtended,
    Fusion,
    CopyNumberAlteration,
    MrnaExpression,
    ProteinLevel,
    Methylation,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MolecularProfile {
    pub molecular_profile_id: String,
    pub study_id: String,
    pub molecular_alteration_type: AlterationType,
    /// Value format of the profile, e.g. `DISCRETE`, `MAF` or `Z-SCORE`.
    pub datatype: String,
    #[serde(default)]
    pub name: String,
}

impl MolecularProfile {
    pub fn is_mutation_profile(&self) -> bool {
        self.molecular_alteration_type == AlterationType::MutationExtended
    }

    pub fn is_discrete(&self) -> bool {
        self.datatype == "DISCRETE"
    }
}

/// Scopes a remote alteration fetch to the queried samples of one study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataQueryFilter {
    SampleListId(String),
    SampleIds(Vec<String>),
}

impl DataQueryFilter {
    /// Prefers the sample list the study was queried with, falling back to
    /// the explicit sample ids.
    pub fn generate(sample_list_id: Option<&str>, sample_ids: &BTreeSet<String>) -> Self {
        match sample_list_id {
            Some(id) => Self::SampleListId(id.to_owned()),
            None => Self::SampleIds(sample_ids.iter().cloned().collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub molecular_profile_id: String,
    pub study_id: String,
    pub sample_id: String,
    pub gene: Gene,
    #[serde(default)]
    pub protein_change: String,
    #[serde(default)]
    pub mutation_type: String,
    /// `Somatic`, `Germline` or empty when unknown.
    #[serde(default)]
    pub mutation_status: String,
}

impl Mutation {
    pub fn is_germline(&self) -> bool {
        self.mutation_status.eq_ignore_ascii_case("germline")
    }

    pub fn sample(&self) -> SampleIdentifier {
        SampleIdentifier::new(&self.study_id, &self.sample_id)
    }
}

/// A raw, untyped value of a non-mutation profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneMolecularData {
    pub molecular_profile_id: String,
    pub study_id: String,
    pub sample_id: String,
    pub gene: Gene,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscreteCopyNumberData {
    pub molecular_profile_id: String,
    pub study_id: String,
    pub sample_id: String,
    pub gene: Gene,
    /// Copy-number call, `-2` for a homozygous deletion up to `2` for an
    /// amplification.
    pub alteration: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalData {
    pub study_id: String,
    /// The sample id for sample-level attributes.
    pub entity_id: String,
    pub clinical_attribute_id: String,
    pub value: String,
}

/// A typed value of a non-mutation profile for one gene in one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDatum<V> {
    pub molecular_profile_id: String,
    pub study_id: String,
    pub sample_id: String,
    pub gene: Gene,
    pub value: V,
}

/// Integer copy-number call.
pub type CopyNumberEvent = ProfileDatum<i32>;
/// mRNA expression z-score.
pub type ExpressionDatum = ProfileDatum<f64>;
/// Protein level (RPPA) score.
pub type ProteinDatum = ProfileDatum<f64>;

/// Any alteration the pipeline groups, filters and projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AlterationRecord {
    Mutation(Mutation),
    CopyNumberEvent(CopyNumberEvent),
    ExpressionDatum(ExpressionDatum),
    ProteinDatum(ProteinDatum),
}

impl AlterationRecord {
    /// Types a raw datum by the alteration type of its profile. Returns `None`
    /// for profiles that carry no filterable alterations and for values that
    /// do not parse.
    pub fn from_molecular_data(data: &GeneMolecularData, profile: &MolecularProfile) -> Option<Self> {
        let value = data.value.trim();

        let record = match profile.molecular_alteration_type {
            AlterationType::CopyNumberAlteration => Self::CopyNumberEvent(datum(data, value.parse().ok()?)),
            AlterationType::MrnaExpression => Self::ExpressionDatum(datum(data, parse_finite(value)?)),
            AlterationType::ProteinLevel => Self::ProteinDatum(datum(data, parse_finite(value)?)),
            _ => return None,
        };

        Some(record)
    }

    pub fn gene(&self) -> &Gene {
        match self {
            Self::Mutation(m) => &m.gene,
            Self::CopyNumberEvent(d) => &d.gene,
            Self::ExpressionDatum(d) | Self::ProteinDatum(d) => &d.gene,
        }
    }

    pub fn gene_symbol(&self) -> &str {
        &self.gene().hugo_gene_symbol
    }

    pub fn sample_id(&self) -> &str {
        match self {
            Self::Mutation(m) => &m.sample_id,
            Self::CopyNumberEvent(d) => &d.sample_id,
            Self::ExpressionDatum(d) | Self::ProteinDatum(d) => &d.sample_id,
        }
    }

    pub fn study_id(&self) -> &str {
        match self {
            Self::Mutation(m) => &m.study_id,
            Self::CopyNumberEvent(d) => &d.study_id,
            Self::ExpressionDatum(d) | Self::ProteinDatum(d) => &d.study_id,
        }
    }

    pub fn molecular_profile_id(&self) -> &str {
        match self {
            Self::Mutation(m) => &m.molecular_profile_id,
            Self::CopyNumberEvent(d) => &d.molecular_profile_id,
            Self::ExpressionDatum(d) | Self::ProteinDatum(d) => &d.molecular_profile_id,
        }
    }
}

impl From<Mutation> for AlterationRecord {
    fn from(mutation: Mutation) -> Self {
        Self::Mutation(mutation)
    }
}

fn datum<V>(data: &GeneMolecularData, value: V) -> ProfileDatum<V> {
    ProfileDatum {
        molecular_profile_id: data.molecular_profile_id.clone(),
        study_id: data.study_id.clone(),
        sample_id: data.sample_id.clone(),
        gene: data.gene.clone(),
        value,
    }
}

fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
