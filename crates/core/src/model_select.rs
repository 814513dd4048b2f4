use crate::retry::RetryPolicy;
use crate::traits::ModelCatalog;
use crate::SelectError;
use regex::Regex;
use tracing::info;

/// Newest and fastest first.
pub const DEFAULT_MODEL_CANDIDATES: [&str; 3] =
    ["gemini-3-flash", "gemini-2.5-flash", "gemini-flash-latest"];

fn variant_pattern(candidate: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"^{}-(\d[\w.-]*|latest|preview[\w.-]*|exp[\w.-]*)$",
        regex::escape(candidate)
    ))
    .ok()
}

/// First candidate, in preference order, that `available` can serve.
///
/// An exact name beats a release variant (`-001`, `-latest`, `-preview-…`); among variants
/// the lexicographically smallest wins. Unrelated siblings such as `-lite` never match.
pub fn select_model<S: AsRef<str>>(
    candidates: &[S],
    available: &[String],
) -> Result<String, SelectError> {
    let available: Vec<&str> = available
        .iter()
        .map(|name| name.strip_prefix("models/").unwrap_or(name))
        .collect();

    for candidate in candidates {
        let candidate = candidate.as_ref();
        if available.contains(&candidate) {
            return Ok(candidate.to_string());
        }

        let Some(pattern) = variant_pattern(candidate) else {
            continue;
        };
        let mut variants: Vec<&str> = available
            .iter()
            .copied()
            .filter(|name| pattern.is_match(name))
            .collect();
        variants.sort_unstable();
        if let Some(first) = variants.first() {
            return Ok(first.to_string());
        }
    }

    Err(SelectError::NoModelAvailable {
        tried: candidates
            .iter()
            .map(|candidate| candidate.as_ref().to_string())
            .collect(),
    })
}

pub async fn probe_model<S: AsRef<str>>(
    catalog: &dyn ModelCatalog,
    candidates: &[S],
    policy: &RetryPolicy,
) -> Result<String, SelectError> {
    let available = policy
        .run("list_models", || catalog.list_available_models())
        .await?;
    let selected = select_model(candidates, &available)?;
    info!(model = %selected, available = available.len(), "language model selected");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmError;
    use async_trait::async_trait;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn only_third_candidate_available_selects_third() {
        let candidates = ["model-a", "model-b", "model-c", "model-d"];
        let available = names(&["models/model-c", "models/unrelated"]);

        for _ in 0..3 {
            assert_eq!(select_model(&candidates, &available).ok().as_deref(), Some("model-c"));
        }
    }

    #[test]
    fn nothing_usable_is_an_error() {
        let result = select_model(&DEFAULT_MODEL_CANDIDATES, &names(&["text-embedding-004"]));
        match result {
            Err(SelectError::NoModelAvailable { tried }) => assert_eq!(tried.len(), 3),
            other => panic!("expected NoModelAvailable, got {other:?}"),
        }
    }

    #[test]
    fn exact_name_beats_variants_and_siblings_do_not_match() {
        let available = names(&[
            "gemini-2.5-flash-lite",
            "gemini-2.5-flash-001",
            "gemini-2.5-flash",
        ]);
        assert_eq!(
            select_model(&["gemini-2.5-flash"], &available).ok().as_deref(),
            Some("gemini-2.5-flash")
        );

        let lite_only = names(&["gemini-2.5-flash-lite"]);
        assert!(select_model(&["gemini-2.5-flash"], &lite_only).is_err());
    }

    #[test]
    fn preview_release_satisfies_candidate() {
        let available = names(&["gemini-2.5-flash", "gemini-3-flash-preview"]);
        assert_eq!(
            select_model(&DEFAULT_MODEL_CANDIDATES, &available).ok().as_deref(),
            Some("gemini-3-flash-preview")
        );
    }

    struct FixedCatalog(Vec<String>);

    #[async_trait]
    impl ModelCatalog for FixedCatalog {
        async fn list_available_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct RejectingCatalog;

    #[async_trait]
    impl ModelCatalog for RejectingCatalog {
        async fn list_available_models(&self) -> Result<Vec<String>, LlmError> {
            Err(LlmError::Unauthorized("bad key".to_string()))
        }
    }

    #[tokio::test]
    async fn probe_uses_catalog_listing() {
        let catalog = FixedCatalog(names(&["models/gemini-flash-latest"]));
        let selected = probe_model(&catalog, &DEFAULT_MODEL_CANDIDATES, &RetryPolicy::default()).await;
        assert_eq!(selected.ok().as_deref(), Some("gemini-flash-latest"));
    }

    #[tokio::test]
    async fn rejected_credential_fails_probe() {
        let result = probe_model(&RejectingCatalog, &DEFAULT_MODEL_CANDIDATES, &RetryPolicy::default()).await;
        assert!(matches!(result, Err(SelectError::Listing(LlmError::Unauthorized(_)))));
    }
}
