//! Script section layout: parsing, formatting, and the deterministic
//! transcript-to-script allocation used by copy mode.

use serde::{Deserialize, Serialize};

/// A script split into its three delivery sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptSections {
    pub hook: String,
    pub body: String,
    pub cta: String,
}

impl ScriptSections {
    /// Parse a `[HOOK]/[BODY]/[CTA]` laid-out script. Text before the first
    /// marker, or a script with no markers at all, lands in the body.
    pub fn parse(text: &str) -> Self {
        let mut sections = ScriptSections::default();
        let mut current: Option<&str> = None;
        let mut unmarked = Vec::new();

        for line in text.lines() {
            match line.trim() {
                "[HOOK]" => current = Some("hook"),
                "[BODY]" => current = Some("body"),
                "[CTA]" => current = Some("cta"),
                content => {
                    let target = match current {
                        Some("hook") => &mut sections.hook,
                        Some("body") => &mut sections.body,
                        Some("cta") => &mut sections.cta,
                        _ => {
                            if !content.is_empty() {
                                unmarked.push(content);
                            }
                            continue;
                        }
                    };
                    if !content.is_empty() {
                        if !target.is_empty() {
                            target.push('\n');
                        }
                        target.push_str(content);
                    }
                }
            }
        }

        if sections.hook.is_empty() && sections.body.is_empty() && sections.cta.is_empty() {
            sections.body = unmarked.join("\n");
        }
        sections
    }

    /// Render back into the canonical marker layout.
    pub fn format(&self) -> String {
        format!("[HOOK]\n{}\n\n[BODY]\n{}\n\n[CTA]\n{}", self.hook, self.body, self.cta)
    }

    /// First line of the hook, truncated to `max` characters. Used when prior
    /// scripts are summarized for the generator.
    pub fn hook_summary(&self, max: usize) -> String {
        truncate_chars(self.hook.lines().next().unwrap_or(""), max)
    }

    /// First line of the body, truncated to `max` characters.
    pub fn body_summary(&self, max: usize) -> String {
        truncate_chars(self.body.lines().next().unwrap_or(""), max)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

/// Split text into sentences on `.`, `!`, `?` boundaries, keeping the
/// terminator with the sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Deterministic copy-mode allocation of a transcript into sections.
///
/// Three sentences or fewer: first is the hook, last is the CTA, the
/// remainder is the body. Otherwise the first 20% of sentences form the
/// hook, the last 20% the CTA, and the middle the body.
pub fn allocate_transcript(transcript: &str) -> ScriptSections {
    let sentences = split_sentences(transcript);

    match sentences.len() {
        0 => ScriptSections::default(),
        1 => ScriptSections {
            hook: sentences[0].clone(),
            ..Default::default()
        },
        2 => ScriptSections {
            hook: sentences[0].clone(),
            cta: sentences[1].clone(),
            ..Default::default()
        },
        3 => ScriptSections {
            hook: sentences[0].clone(),
            body: sentences[1].clone(),
            cta: sentences[2].clone(),
        },
        n => {
            // 20% head and tail, at least one sentence each.
            let edge = (n / 5).max(1);
            ScriptSections {
                hook: sentences[..edge].join(" "),
                body: sentences[edge..n - edge].join(" "),
                cta: sentences[n - edge..].join(" "),
            }
        }
    }
}

/// Build the copy-mode script from analysis parts: transcript allocated into
/// sections, with scene descriptions and visual cues appended as staging
/// notes under the body.
pub fn copy_mode_script(
    transcript: &str,
    scene_descriptions: &[String],
    visual_cues: &[String],
) -> String {
    let mut sections = allocate_transcript(transcript);

    if !scene_descriptions.is_empty() {
        sections.body.push_str("\n\nScenes:");
        for scene in scene_descriptions {
            sections.body.push_str("\n- ");
            sections.body.push_str(scene);
        }
    }
    if !visual_cues.is_empty() {
        sections.body.push_str("\n\nOn screen:");
        for cue in visual_cues {
            sections.body.push_str("\n- ");
            sections.body.push_str(cue);
        }
    }

    sections.format()
}

/// Deterministic fallback skeleton delivered after retry exhaustion, so the
/// conversation never dead-ends. Embeds the subscriber's idea verbatim.
pub fn fallback_script(idea: &str) -> String {
    let idea = idea.trim();
    format!(
        "[HOOK]\nHere's a thought on {idea} that most people get wrong.\n\n\
         [BODY]\nI couldn't finish a full script for this one, so here's a starting point. \
         Open with the single most surprising thing you know about {idea}. \
         Back it with one concrete example from your own experience, then name the mistake \
         you see people make and what to do instead.\n\n\
         [CTA]\nFollow for the full breakdown on {idea} — and send me another reel to try again."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let text = "[HOOK]\nStop scrolling.\n\n[BODY]\nLine one.\nLine two.\n\n[CTA]\nFollow me.";
        let sections = ScriptSections::parse(text);
        assert_eq!(sections.hook, "Stop scrolling.");
        assert_eq!(sections.body, "Line one.\nLine two.");
        assert_eq!(sections.cta, "Follow me.");
        assert_eq!(ScriptSections::parse(&sections.format()), sections);
    }

    #[test]
    fn test_parse_unmarked_text_lands_in_body() {
        let sections = ScriptSections::parse("just some text\nwith two lines");
        assert!(sections.hook.is_empty());
        assert_eq!(sections.body, "just some text\nwith two lines");
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_allocate_three_or_fewer() {
        let s = allocate_transcript("First. Second. Third.");
        assert_eq!(s.hook, "First.");
        assert_eq!(s.body, "Second.");
        assert_eq!(s.cta, "Third.");

        let two = allocate_transcript("First. Second.");
        assert_eq!(two.hook, "First.");
        assert!(two.body.is_empty());
        assert_eq!(two.cta, "Second.");
    }

    #[test]
    fn test_allocate_percent_split() {
        // Ten sentences: 2 hook, 6 body, 2 CTA.
        let text = (1..=10).map(|i| format!("S{}.", i)).collect::<Vec<_>>().join(" ");
        let s = allocate_transcript(&text);
        assert_eq!(s.hook, "S1. S2.");
        assert_eq!(s.cta, "S9. S10.");
        assert!(s.body.starts_with("S3.") && s.body.ends_with("S8."));
    }

    #[test]
    fn test_allocate_four_sentences_keeps_one_each_edge() {
        let s = allocate_transcript("A. B. C. D.");
        assert_eq!(s.hook, "A.");
        assert_eq!(s.body, "B. C.");
        assert_eq!(s.cta, "D.");
    }

    #[test]
    fn test_copy_mode_appends_staging_notes() {
        let script = copy_mode_script(
            "First. Second. Third.",
            &["Close-up at desk".to_string()],
            &["Caption: 3 mistakes".to_string()],
        );
        assert!(script.contains("[HOOK]\nFirst."));
        assert!(script.contains("Scenes:\n- Close-up at desk"));
        assert!(script.contains("On screen:\n- Caption: 3 mistakes"));
    }

    #[test]
    fn test_fallback_embeds_idea_and_parses() {
        let script = fallback_script("pricing strategy");
        assert!(script.contains("pricing strategy"));
        let sections = ScriptSections::parse(&script);
        assert!(!sections.hook.is_empty());
        assert!(!sections.body.is_empty());
        assert!(!sections.cta.is_empty());
    }
}
