//! Default-idea synthesis for the instant flow.
//!
//! When a subscriber sends a reel with no idea of their own, pick one from
//! a decision tree: explicit niche from user memory, then the analyzed hook
//! type, then the content type, then a generic prompt.

use reelscript_models::{ReelAnalysis, UserMemory};

/// Decide the default idea. Pure over its inputs.
pub fn default_idea(memory: Option<&UserMemory>, analysis: Option<&ReelAnalysis>) -> String {
    if let Some(niche) = memory.and_then(|m| m.niche.as_deref()) {
        return format!("Adapt this video's angle to my {} audience", niche);
    }

    if let Some(hook_type) = analysis.and_then(|a| a.hook_type.as_deref()) {
        return match hook_type {
            "question" => "Open with a question my audience can't ignore".to_string(),
            "bold_claim" => "Make a bold claim and back it up".to_string(),
            "pattern_interrupt" => "Start with something unexpected to stop the scroll".to_string(),
            "story" => "Tell it as a short personal story".to_string(),
            other => format!("Use a {} style hook for my audience", other.replace('_', " ")),
        };
    }

    if let Some(content_type) = analysis.and_then(|a| a.content_type.as_deref()) {
        return match content_type {
            "tutorial" => "Turn this into a quick how-to for my followers".to_string(),
            "talking_head" => "Make this a direct-to-camera take in my voice".to_string(),
            "skit" => "Keep the comedic structure but fit my topic".to_string(),
            other => format!("Adapt this {} format to my own topic", other.replace('_', " ")),
        };
    }

    "Recreate this video's structure with my own spin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with_niche(niche: &str) -> UserMemory {
        UserMemory {
            subscriber_id: "1".to_string(),
            niche: Some(niche.to_string()),
            ..Default::default()
        }
    }

    fn analysis_with(hook: Option<&str>, content: Option<&str>) -> ReelAnalysis {
        let mut a = ReelAnalysis::new("h", "u");
        a.hook_type = hook.map(String::from);
        a.content_type = content.map(String::from);
        a
    }

    #[test]
    fn test_niche_wins_over_everything() {
        let memory = memory_with_niche("fitness");
        let analysis = analysis_with(Some("question"), Some("tutorial"));
        let idea = default_idea(Some(&memory), Some(&analysis));
        assert!(idea.contains("fitness"));
    }

    #[test]
    fn test_hook_type_beats_content_type() {
        let analysis = analysis_with(Some("bold_claim"), Some("tutorial"));
        let idea = default_idea(None, Some(&analysis));
        assert!(idea.contains("bold claim"));
    }

    #[test]
    fn test_content_type_fallback() {
        let analysis = analysis_with(None, Some("tutorial"));
        let idea = default_idea(None, Some(&analysis));
        assert!(idea.contains("how-to"));
    }

    #[test]
    fn test_generic_fallback() {
        let idea = default_idea(None, None);
        assert!(idea.contains("structure"));
    }
}
