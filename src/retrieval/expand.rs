//! Query surface normalisation and sub-query expansion (§4.3 steps 1-2).

use crate::model_runtime::{ModelRuntime, Queryable, QueryableKind};

/// One entry of the MCP multi-sub-search list.
#[derive(Debug, Clone)]
pub struct SubSearchSpec {
    pub kind: QueryableKind,
    pub query: String,
}

/// The normalised query surface: a bare string becomes `{text}` with all
/// other fields empty.
#[derive(Debug, Clone, Default)]
pub struct NormalizedQuery {
    pub text: String,
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
    pub passage: Option<String>,
    /// Set only for the MCP multi-sub-search surface; bypasses expansion
    /// entirely (§4.3 "Query surface").
    pub sub_searches: Option<Vec<SubSearchSpec>>,
}

impl NormalizedQuery {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn has_caller_expansions(&self) -> bool {
        !self.keywords.is_empty() || !self.concepts.is_empty() || self.passage.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Build sub-queries directly from caller-supplied expansions (§4.3 step 2,
/// "if caller provided expansions").
pub fn queryables_from_caller_expansions(q: &NormalizedQuery) -> Vec<Queryable> {
    let mut out = Vec::new();
    for keyword in &q.keywords {
        out.push(Queryable {
            kind: QueryableKind::Lex,
            text: keyword.clone(),
        });
    }
    for concept in &q.concepts {
        out.push(Queryable {
            kind: QueryableKind::Vec,
            text: concept.clone(),
        });
    }
    if let Some(passage) = &q.passage {
        if !passage.is_empty() {
            out.push(Queryable {
                kind: QueryableKind::Hyde,
                text: passage.clone(),
            });
        }
    }
    out
}

/// Step 2: build the list of sub-queries to search with, given whether the
/// strong-signal probe already short-circuited expansion.
pub async fn expand(
    q: &NormalizedQuery,
    runtime: &dyn ModelRuntime,
    context: Option<&str>,
    include_lexical: bool,
) -> Vec<Queryable> {
    if let Some(subs) = &q.sub_searches {
        return subs
            .iter()
            .map(|s| Queryable {
                kind: s.kind.clone(),
                text: s.query.clone(),
            })
            .collect();
    }

    if q.has_caller_expansions() {
        return queryables_from_caller_expansions(q);
    }

    runtime.expand_query(&q.text, context, include_lexical).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_normalizes_to_text_only() {
        let q = NormalizedQuery::from_text("deploy staging");
        assert_eq!(q.text, "deploy staging");
        assert!(!q.has_caller_expansions());
    }

    #[test]
    fn caller_expansions_detected() {
        let q = NormalizedQuery {
            text: "deploy".into(),
            keywords: vec!["staging".into()],
            ..Default::default()
        };
        assert!(q.has_caller_expansions());
    }

    #[test]
    fn empty_passage_does_not_count_as_expansion() {
        let q = NormalizedQuery {
            text: "deploy".into(),
            passage: Some(String::new()),
            ..Default::default()
        };
        assert!(!q.has_caller_expansions());
    }

    #[test]
    fn caller_expansions_build_expected_queryables() {
        let q = NormalizedQuery {
            text: "deploy".into(),
            keywords: vec!["staging".into(), "rollout".into()],
            concepts: vec!["release process".into()],
            passage: Some("a document about deployments".into()),
            sub_searches: None,
        };
        let queryables = queryables_from_caller_expansions(&q);
        assert_eq!(queryables.len(), 4);
        assert_eq!(queryables[0].kind, QueryableKind::Lex);
        assert_eq!(queryables[2].kind, QueryableKind::Vec);
        assert_eq!(queryables[3].kind, QueryableKind::Hyde);
    }
}
