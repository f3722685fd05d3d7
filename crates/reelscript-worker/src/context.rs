//! Prior-script context for the generator.
//!
//! Up to five earlier scripts for the same canonical URL are partitioned:
//! same-idea scripts contribute hook/body summaries (to steer away from
//! repetition), different-idea scripts contribute full bodies as style
//! reference. Retrieval is best-effort; a lookup failure is logged, never
//! propagated.

use tracing::warn;

use reelscript_models::{normalize_idea, ScriptRecord, ScriptSections};
use reelscript_store::ScriptRepository;

/// Scripts consulted per generation.
const PRIOR_SCRIPT_LIMIT: i32 = 5;

/// Characters kept of each summarized line.
const SUMMARY_MAX_CHARS: usize = 80;

/// Prior-script context fed to the prompt builder.
#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    /// "hook — body" first lines of earlier scripts for the same idea.
    pub same_idea_summaries: Vec<String>,
    /// Full bodies of scripts for other ideas on the same reel.
    pub style_bodies: Vec<String>,
}

/// Pure partition of prior scripts against the current idea.
pub fn partition_prior_scripts(scripts: &[ScriptRecord], idea: &str) -> PriorContext {
    let current = normalize_idea(idea);
    let mut context = PriorContext::default();

    for script in scripts {
        let sections = ScriptSections::parse(&script.script_text);
        if normalize_idea(&script.idea) == current {
            context.same_idea_summaries.push(format!(
                "{} — {}",
                sections.hook_summary(SUMMARY_MAX_CHARS),
                sections.body_summary(SUMMARY_MAX_CHARS)
            ));
        } else {
            context.style_bodies.push(script.script_text.clone());
        }
    }

    context
}

/// Fetch and partition, absorbing lookup failures.
pub async fn load_prior_context(
    scripts: &ScriptRepository,
    canonical_url: &str,
    idea: &str,
) -> PriorContext {
    match scripts.list_recent_for_url(canonical_url, PRIOR_SCRIPT_LIMIT).await {
        Ok(prior) => partition_prior_scripts(&prior, idea),
        Err(e) => {
            warn!("Prior-script lookup failed (continuing without context): {}", e);
            PriorContext::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reelscript_models::PublicId;

    fn script(idea: &str, text: &str) -> ScriptRecord {
        ScriptRecord {
            request_hash: format!("hash-{}", idea),
            public_id: PublicId::parse("AbCdEf12").unwrap(),
            subscriber_id: "1".to_string(),
            canonical_url: "https://www.instagram.com/reel/AbC".to_string(),
            idea: idea.to_string(),
            variation_index: 0,
            script_text: text.to_string(),
            image_urls: vec![],
            view_url: String::new(),
            generator_version: String::new(),
            generation_ms: 0,
            is_copy_mode: false,
            quality_score: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_partition_splits_on_normalized_idea() {
        let scripts = vec![
            script("Coding", "[HOOK]\nHook one\n\n[BODY]\nBody one\n\n[CTA]\nBye"),
            script("baking", "[HOOK]\nHook two\n\n[BODY]\nBody two\n\n[CTA]\nBye"),
        ];
        let context = partition_prior_scripts(&scripts, "  coding ");
        assert_eq!(context.same_idea_summaries.len(), 1);
        assert_eq!(context.style_bodies.len(), 1);
        assert!(context.same_idea_summaries[0].contains("Hook one"));
        assert!(context.style_bodies[0].contains("Body two"));
    }

    #[test]
    fn test_summaries_are_truncated() {
        let long_hook = "x".repeat(200);
        let scripts = vec![script(
            "idea one",
            &format!("[HOOK]\n{}\n\n[BODY]\nshort\n\n[CTA]\nend", long_hook),
        )];
        let context = partition_prior_scripts(&scripts, "idea one");
        // 80 chars plus the ellipsis marker.
        assert!(context.same_idea_summaries[0].chars().count() < 200);
    }
}
