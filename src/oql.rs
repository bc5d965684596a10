//! Alteration query expressions.
//!
//! A query expression such as `"MUT AMP EXP>=2"` selects which alteration
//! records are kept for each gene. Evaluation goes through the
//! [`AlterationFilter`] trait so that a full query-language evaluator can be
//! plugged in; [`TokenFilter`] covers flat token lists, which is everything
//! [`default_oql_query`] produces.

use std::collections::HashMap;

use crate::model::{AlterationRecord, AlterationType, MolecularProfile};

/// Answers questions about the profiles a record came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileAccessors {
    types: HashMap<String, AlterationType>,
}

impl ProfileAccessors {
    pub fn new<'a>(profiles: impl IntoIterator<Item = &'a MolecularProfile>) -> Self {
        let types = profiles
            .into_iter()
            .map(|p| (p.molecular_profile_id.clone(), p.molecular_alteration_type))
            .collect();

        Self { types }
    }

    pub fn alteration_type(&self, molecular_profile_id: &str) -> Option<AlterationType> {
        self.types.get(molecular_profile_id).copied()
    }

    pub fn is_selected(&self, molecular_profile_id: &str) -> bool {
        self.types.contains_key(molecular_profile_id)
    }
}

/// Evaluates a query expression against the records of one gene.
pub trait AlterationFilter: Send + Sync {
    /// Returns the records selected by `query`, or by `default_query` when
    /// `query` is blank.
    fn filter(
        &self,
        query: &str,
        records: Vec<AlterationRecord>,
        accessors: &ProfileAccessors,
        default_query: &str,
    ) -> Vec<AlterationRecord>;
}

/// Derives the fallback query expression from the alteration types of the
/// selected profiles.
///
/// Tokens keep the order in which their type is first seen and appear once.
/// Types without a default query contribute nothing.
pub fn default_oql_query(
    types: impl IntoIterator<Item = AlterationType>,
    z_score_threshold: f64,
    rppa_score_threshold: f64,
) -> String {
    let mut tokens: Vec<String> = vec![];

    for kind in types {
        let pair = match kind {
            AlterationType::MutationExtended => ["MUT".to_string(), "FUSION".to_string()],
            AlterationType::CopyNumberAlteration => ["AMP".to_string(), "HOMDEL".to_string()],
            AlterationType::MrnaExpression => [
                format!("EXP>={z_score_threshold}"),
                format!("EXP<=-{z_score_threshold}"),
            ],
            AlterationType::ProteinLevel => [
                format!("PROT>={rppa_score_threshold}"),
                format!("PROT<=-{rppa_score_threshold}"),
            ],
            _ => continue,
        };

        for token in pair {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
    }

    tokens.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Comparison {
    Ge,
    Le,
    Gt,
    Lt,
}

impl Comparison {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Mutation,
    Fusion,
    CopyNumber(i32),
    Expression(Comparison, f64),
    Protein(Comparison, f64),
}

impl Token {
    fn parse(token: &str) -> Option<Self> {
        let token = token.to_ascii_uppercase();

        let simple = match token.as_str() {
            "MUT" => Some(Self::Mutation),
            "FUSION" => Some(Self::Fusion),
            "AMP" => Some(Self::CopyNumber(2)),
            "GAIN" => Some(Self::CopyNumber(1)),
            "HETLOSS" => Some(Self::CopyNumber(-1)),
            "HOMDEL" => Some(Self::CopyNumber(-2)),
            _ => None,
        };

        if simple.is_some() {
            return simple;
        }

        if let Some(rest) = token.strip_prefix("EXP") {
            let (cmp, value) = comparison(rest)?;
            return Some(Self::Expression(cmp, value));
        }

        if let Some(rest) = token.strip_prefix("PROT") {
            let (cmp, value) = comparison(rest)?;
            return Some(Self::Protein(cmp, value));
        }

        None
    }

    fn matches(self, record: &AlterationRecord) -> bool {
        match (self, record) {
            (Self::Mutation, AlterationRecord::Mutation(m)) => !is_fusion(&m.mutation_type),
            (Self::Fusion, AlterationRecord::Mutation(m)) => is_fusion(&m.mutation_type),
            (Self::CopyNumber(call), AlterationRecord::CopyNumberEvent(d)) => d.value == call,
            (Self::Expression(cmp, t), AlterationRecord::ExpressionDatum(d)) => cmp.holds(d.value, t),
            (Self::Protein(cmp, t), AlterationRecord::ProteinDatum(d)) => cmp.holds(d.value, t),
            _ => false,
        }
    }
}

fn is_fusion(mutation_type: &str) -> bool {
    mutation_type.eq_ignore_ascii_case("fusion")
}

fn comparison(rest: &str) -> Option<(Comparison, f64)> {
    let (cmp, value) = if let Some(v) = rest.strip_prefix(">=") {
        (Comparison::Ge, v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (Comparison::Le, v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (Comparison::Gt, v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (Comparison::Lt, v)
    } else {
        return None;
    };

    let value = value.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((cmp, value))
}

/// Evaluates flat, gene-independent token lists.
///
/// Supported tokens are `MUT`, `FUSION`, `AMP`, `GAIN`, `HETLOSS`, `HOMDEL`
/// and comparisons of the form `EXP>=2` or `PROT<=-1.5`. A record is kept when
/// any token matches it. Non-mutation records are only considered when they
/// belong to one of the selected profiles. Unknown tokens are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenFilter;

impl AlterationFilter for TokenFilter {
    fn filter(
        &self,
        query: &str,
        records: Vec<AlterationRecord>,
        accessors: &ProfileAccessors,
        default_query: &str,
    ) -> Vec<AlterationRecord> {
        let query = if query.trim().is_empty() { default_query } else { query };

        let tokens: Vec<Token> = query
            .split_whitespace()
            .filter_map(|raw| {
                let token = Token::parse(raw);
                if token.is_none() {
                    tracing::debug!(token = raw, "ignoring unsupported query token");
                }
                token
            })
            .collect();

        records
            .into_iter()
            .filter(|record| {
                matches!(record, AlterationRecord::Mutation(_))
                    || accessors.is_selected(record.molecular_profile_id())
            })
            .filter(|record| tokens.iter().any(|token| token.matches(record)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gene, Mutation, ProfileDatum};

    use AlterationType::*;

    fn gene() -> Gene {
        Gene {
            entrez_gene_id: 7157,
            hugo_gene_symbol: "TP53".into(),
        }
    }

    fn mutation(sample: &str, kind: &str) -> AlterationRecord {
        AlterationRecord::Mutation(Mutation {
            molecular_profile_id: "brca_mutations".into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: gene(),
            protein_change: "R273H".into(),
            mutation_type: kind.into(),
            mutation_status: String::new(),
        })
    }

    fn datum<V>(profile: &str, sample: &str, value: V) -> ProfileDatum<V> {
        ProfileDatum {
            molecular_profile_id: profile.into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: gene(),
            value,
        }
    }

    fn accessors() -> ProfileAccessors {
        let profile = |id: &str, kind| MolecularProfile {
            molecular_profile_id: id.into(),
            study_id: "brca".into(),
            molecular_alteration_type: kind,
            datatype: String::new(),
            name: String::new(),
        };

        ProfileAccessors::new(&[
            profile("brca_gistic", CopyNumberAlteration),
            profile("brca_mrna", MrnaExpression),
        ])
    }

    #[test]
    fn test_default_query_mutation_and_cna() {
        let query = default_oql_query([MutationExtended, CopyNumberAlteration], 7.0, 9.0);
        assert_eq!(query, "MUT FUSION AMP HOMDEL");
    }

    #[test]
    fn test_default_query_expression_threshold() {
        assert_eq!(default_oql_query([MrnaExpression], 2.0, 2.0), "EXP>=2 EXP<=-2");
        assert_eq!(default_oql_query([ProteinLevel], 2.0, 1.5), "PROT>=1.5 PROT<=-1.5");
    }

    #[test]
    fn test_default_query_dedup_and_order() {
        let query = default_oql_query(
            [CopyNumberAlteration, Methylation, MutationExtended, CopyNumberAlteration, Other],
            2.0,
            2.0,
        );
        assert_eq!(query, "AMP HOMDEL MUT FUSION");
        assert_eq!(default_oql_query([], 2.0, 2.0), "");
    }

    #[test]
    fn test_token_filter_uses_default_for_blank_query() {
        let records = vec![
            mutation("s1", "Missense_Mutation"),
            AlterationRecord::CopyNumberEvent(datum("brca_gistic", "s2", 2)),
            AlterationRecord::CopyNumberEvent(datum("brca_gistic", "s3", 1)),
        ];

        let kept = TokenFilter.filter("  ", records, &accessors(), "MUT AMP");
        let samples: Vec<_> = kept.iter().map(|r| r.sample_id()).collect();
        assert_eq!(samples, vec!["s1", "s2"]);
    }

    #[test]
    fn test_token_filter_thresholds() {
        let records = vec![
            AlterationRecord::ExpressionDatum(datum("brca_mrna", "s1", 2.5)),
            AlterationRecord::ExpressionDatum(datum("brca_mrna", "s2", 0.3)),
            AlterationRecord::ExpressionDatum(datum("brca_mrna", "s3", -2.0)),
            AlterationRecord::ExpressionDatum(datum("other_mrna", "s4", 9.0)),
        ];

        let kept = TokenFilter.filter("EXP>=2 EXP<=-2", records, &accessors(), "");
        let samples: Vec<_> = kept.iter().map(|r| r.sample_id()).collect();
        assert_eq!(samples, vec!["s1", "s3"]);
    }

    #[test]
    fn test_token_filter_fusion_is_not_mut() {
        let records = vec![mutation("s1", "Fusion"), mutation("s2", "Nonsense_Mutation")];

        let kept = TokenFilter.filter("fusion", records, &accessors(), "MUT");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].sample_id(), "s1");
    }
}
