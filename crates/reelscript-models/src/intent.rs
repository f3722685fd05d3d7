//! Intent classification for inbound conversational messages.
//!
//! Parsing is deterministic and pure. Priority order (first match wins):
//! copy > generate/instant > redo > positive feedback > negative feedback >
//! substantial content (idea) > unknown. The ordering of patterns inside each
//! table is contractual; tests pin observable tie-breaks.
//!
//! Modifier extraction (tone, intensity, hook-only) is orthogonal and may
//! co-occur with any intent type.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of intent types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Generate,
    Copy,
    Redo,
    PositiveFeedback,
    NegativeFeedback,
    Idea,
    Unknown,
}

/// Feedback polarity when an intent is a feedback reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPolarity {
    Positive,
    Negative,
}

/// Requested script tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Professional,
    Funny,
    Provocative,
    Educational,
    Casual,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Funny => "funny",
            Tone::Provocative => "provocative",
            Tone::Educational => "educational",
            Tone::Casual => "casual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "professional" => Some(Tone::Professional),
            "funny" => Some(Tone::Funny),
            "provocative" => Some(Tone::Provocative),
            "educational" => Some(Tone::Educational),
            "casual" => Some(Tone::Casual),
            _ => None,
        }
    }
}

/// Requested script depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Lite,
    #[default]
    Medium,
    Deep,
}

/// Result of classifying one inbound message.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedIntent {
    pub intent: IntentType,
    pub is_instant_flow: bool,
    pub is_copy_flow: bool,
    pub is_redo: bool,
    pub feedback_polarity: Option<FeedbackPolarity>,
    pub detected_tone: Option<Tone>,
    pub intensity: Intensity,
    pub is_hook_only: bool,
    /// Message with all trigger and modifier tokens deleted.
    pub cleaned_message: String,
    pub confidence: f32,
    /// Name of the trigger pattern that decided the type, if any.
    pub matched_pattern: Option<&'static str>,
}

type PatternTable = Vec<(Regex, &'static str)>;

fn compile(table: &[(&str, &'static str)]) -> PatternTable {
    table
        .iter()
        .map(|(pat, name)| (Regex::new(pat).expect("static intent pattern"), *name))
        .collect()
}

fn copy_triggers() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\bcopy (this|that|it)\b", "copy_demonstrative"),
            (r"(?i)^copy\b", "copy_leading"),
            (r"(?i)\btranscribe\b", "copy_transcribe"),
            (r"(?i)\bword for word\b", "copy_word_for_word"),
            (r"(?i)\bexact words\b", "copy_exact_words"),
        ])
    })
}

fn generate_triggers() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\bgenerate\b", "generate_verb"),
            (r"(?i)\binstant\b", "generate_instant"),
            (r"(?i)\bmake (me )?(a |the )?script\b", "generate_make_script"),
            (r"(?i)\bsurprise me\b", "generate_surprise"),
            (r"(?i)^go$", "generate_go"),
        ])
    })
}

fn redo_triggers() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\banother\b", "redo_another"),
            (r"(?i)\bredo\b", "redo_redo"),
            (r"(?i)\bone more\b", "redo_one_more"),
            (r"(?i)\btry again\b", "redo_try_again"),
            (r"(?i)^again\b", "redo_again"),
            (r"(?i)\bnew (version|variation)\b", "redo_new_version"),
        ])
    })
}

fn positive_triggers() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\b(love|loved) (it|this|that)\b", "positive_love"),
            (r"(?i)\b(great|awesome|perfect|amazing)\b", "positive_praise"),
            (r"(?i)^(thanks|thank you)\b", "positive_thanks"),
            (r"(?i)^(yes|yep|yeah)[\s!.]*$", "positive_yes"),
            (r"🔥", "positive_fire"),
            (r"❤", "positive_heart"),
            (r"😍", "positive_heart_eyes"),
            (r"👍", "positive_thumbs_up"),
        ])
    })
}

fn negative_triggers() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\bdon'?t like\b", "negative_dont_like"),
            (r"(?i)\bnot (good|great|for me|it)\b", "negative_not_good"),
            (r"(?i)\b(bad|terrible|awful|boring|meh)\b", "negative_adjective"),
            (r"(?i)\bhate (it|this|that)\b", "negative_hate"),
            (r"👎", "negative_thumbs_down"),
        ])
    })
}

fn tone_patterns() -> &'static Vec<(Regex, Tone)> {
    static TABLE: OnceLock<Vec<(Regex, Tone)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)\b(professional|formal|corporate)\b", Tone::Professional),
            (r"(?i)\b(funny|humorous|hilarious|joke[sy]?)\b", Tone::Funny),
            (r"(?i)\b(provocative|controversial|spicy|bold)\b", Tone::Provocative),
            (r"(?i)\b(educational|informative|teach(ing)?)\b", Tone::Educational),
            (r"(?i)\b(casual|chill|relaxed|laid.?back)\b", Tone::Casual),
        ]
        .iter()
        .map(|(pat, tone)| (Regex::new(pat).expect("static tone pattern"), *tone))
        .collect()
    })
}

fn intensity_patterns() -> &'static Vec<(Regex, Intensity)> {
    static TABLE: OnceLock<Vec<(Regex, Intensity)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)\b(lite|light|short|quick) (version|one|script)\b", Intensity::Lite),
            (r"(?i)\bkeep it (short|brief)\b", Intensity::Lite),
            (r"(?i)\b(deep|detailed|thorough|long) (dive|version|one|script)\b", Intensity::Deep),
            (r"(?i)\bgo deep(er)?\b", Intensity::Deep),
        ]
        .iter()
        .map(|(pat, i)| (Regex::new(pat).expect("static intensity pattern"), *i))
        .collect()
    })
}

fn hook_only_patterns() -> &'static PatternTable {
    static TABLE: OnceLock<PatternTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\bhook only\b", "hook_only"),
            (r"(?i)\b(just|only) (the )?hooks?\b", "hook_just"),
        ])
    })
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("static url pattern"))
}

/// Extract the first embedded URL, returning it and the remaining text.
pub fn extract_url(input: &str) -> (Option<String>, String) {
    match url_pattern().find(input) {
        Some(m) => {
            let url = m.as_str().to_string();
            let mut rest = String::with_capacity(input.len());
            rest.push_str(&input[..m.start()]);
            rest.push_str(&input[m.end()..]);
            (Some(url), rest.trim().to_string())
        }
        None => (None, input.trim().to_string()),
    }
}

/// Parse a message that may carry an embedded URL.
///
/// "`<url>` generate" and "generate" with the URL supplied separately are
/// equivalent: the URL is pulled out and the remainder classified.
pub fn parse_with_url(input: &str) -> (Option<String>, ParsedIntent) {
    let (url, rest) = extract_url(input);
    (url, parse_message(&rest))
}

/// Classify a free-text message. Pure: no state, no I/O.
pub fn parse_message(input: &str) -> ParsedIntent {
    let (_, text) = extract_url(input);

    let detected_tone = tone_patterns()
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, t)| *t);

    let intensity = intensity_patterns()
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, i)| *i)
        .unwrap_or_default();

    let hook_only = hook_only_patterns().iter().any(|(re, _)| re.is_match(&text));

    let cleaned_message = clean_message(&text);

    let first_match = |table: &'static PatternTable| -> Option<&'static str> {
        table
            .iter()
            .find(|(re, _)| re.is_match(&text))
            .map(|(_, name)| *name)
    };

    let (intent, matched_pattern, confidence) = if let Some(p) = first_match(copy_triggers()) {
        (IntentType::Copy, Some(p), 0.95)
    } else if let Some(p) = first_match(generate_triggers()) {
        (IntentType::Generate, Some(p), 0.9)
    } else if let Some(p) = first_match(redo_triggers()) {
        (IntentType::Redo, Some(p), 0.9)
    } else if let Some(p) = first_match(positive_triggers()) {
        (IntentType::PositiveFeedback, Some(p), 0.8)
    } else if let Some(p) = first_match(negative_triggers()) {
        (IntentType::NegativeFeedback, Some(p), 0.8)
    } else if cleaned_message.chars().count() > 3 {
        (IntentType::Idea, None, 0.6)
    } else {
        (IntentType::Unknown, None, 0.1)
    };

    let feedback_polarity = match intent {
        IntentType::PositiveFeedback => Some(FeedbackPolarity::Positive),
        IntentType::NegativeFeedback => Some(FeedbackPolarity::Negative),
        _ => None,
    };

    ParsedIntent {
        intent,
        is_instant_flow: intent == IntentType::Generate,
        is_copy_flow: intent == IntentType::Copy,
        is_redo: intent == IntentType::Redo,
        feedback_polarity,
        detected_tone,
        intensity,
        is_hook_only: hook_only,
        cleaned_message,
        confidence,
        matched_pattern,
    }
}

/// Delete every trigger and modifier token, drop symbol characters (emoji),
/// and collapse whitespace. Re-parsing a cleaned message finds no triggers.
fn clean_message(text: &str) -> String {
    let mut cleaned = text.to_string();

    let tables = [
        copy_triggers(),
        generate_triggers(),
        redo_triggers(),
        positive_triggers(),
        negative_triggers(),
        hook_only_patterns(),
    ];
    for table in tables {
        for (re, _) in table {
            cleaned = re.replace_all(&cleaned, " ").to_string();
        }
    }
    for (re, _) in tone_patterns() {
        cleaned = re.replace_all(&cleaned, " ").to_string();
    }
    for (re, _) in intensity_patterns() {
        cleaned = re.replace_all(&cleaned, " ").to_string();
    }

    cleaned
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_ascii_punctuation() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_beats_generate() {
        let parsed = parse_message("copy this and generate something");
        assert_eq!(parsed.intent, IntentType::Copy);
        assert!(parsed.is_copy_flow);
        assert_eq!(parsed.matched_pattern, Some("copy_demonstrative"));
    }

    #[test]
    fn test_generate_beats_redo() {
        let parsed = parse_message("generate another");
        assert_eq!(parsed.intent, IntentType::Generate);
        assert!(parsed.is_instant_flow);
    }

    #[test]
    fn test_redo() {
        let parsed = parse_message("another");
        assert_eq!(parsed.intent, IntentType::Redo);
        assert!(parsed.is_redo);
    }

    #[test]
    fn test_fire_emoji_is_positive_feedback() {
        let parsed = parse_message("🔥");
        assert_eq!(parsed.intent, IntentType::PositiveFeedback);
        assert_eq!(parsed.feedback_polarity, Some(FeedbackPolarity::Positive));
        assert!(parsed.cleaned_message.is_empty());
    }

    #[test]
    fn test_negative_feedback() {
        let parsed = parse_message("don't like it, meh");
        assert_eq!(parsed.intent, IntentType::NegativeFeedback);
        assert_eq!(parsed.feedback_polarity, Some(FeedbackPolarity::Negative));
    }

    #[test]
    fn test_substantial_content_is_idea() {
        let parsed = parse_message("make it about morning routines for founders");
        assert_eq!(parsed.intent, IntentType::Idea);
        assert!(parsed.cleaned_message.contains("morning routines"));
    }

    #[test]
    fn test_short_residue_is_unknown() {
        let parsed = parse_message("ok");
        assert_eq!(parsed.intent, IntentType::Unknown);
    }

    #[test]
    fn test_modifiers_are_orthogonal() {
        let parsed = parse_message("generate, make it funny, hook only");
        assert_eq!(parsed.intent, IntentType::Generate);
        assert_eq!(parsed.detected_tone, Some(Tone::Funny));
        assert!(parsed.is_hook_only);
    }

    #[test]
    fn test_intensity_detection() {
        assert_eq!(parse_message("quick version please").intensity, Intensity::Lite);
        assert_eq!(parse_message("go deeper on the topic of pricing").intensity, Intensity::Deep);
        assert_eq!(parse_message("something about pricing").intensity, Intensity::Medium);
    }

    #[test]
    fn test_url_extraction_equivalence() {
        let (url, parsed) = parse_with_url("https://www.instagram.com/reel/AbC/ generate");
        assert_eq!(url.as_deref(), Some("https://www.instagram.com/reel/AbC/"));
        assert_eq!(parsed.intent, IntentType::Generate);

        let bare = parse_message("generate");
        assert_eq!(parsed.intent, bare.intent);
    }

    #[test]
    fn test_reparse_of_cleaned_message_has_no_triggers() {
        for input in [
            "copy this word for word",
            "generate a funny one 🔥",
            "another, but make it professional",
            "love it, thanks!",
        ] {
            let once = parse_message(input);
            let twice = parse_message(&once.cleaned_message);
            assert!(
                matches!(twice.intent, IntentType::Unknown | IntentType::Idea),
                "{:?} left triggers in {:?}",
                input,
                once.cleaned_message
            );
            assert!(twice.matched_pattern.is_none());
        }
    }

    #[test]
    fn test_pattern_ordering_is_contractual() {
        // "copy this" must resolve via the demonstrative pattern, not the
        // leading-copy pattern, because table order decides.
        let parsed = parse_message("copy this");
        assert_eq!(parsed.matched_pattern, Some("copy_demonstrative"));
    }
}
