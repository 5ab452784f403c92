//! Safety profiles sent alongside the prompt.

use chorus_core::{SafetyMode, SafetyProfile, SafetySetting};

const CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// The fixed category/threshold table for a mode.
pub fn safety_profile(mode: SafetyMode) -> SafetyProfile {
    let settings = CATEGORIES
        .iter()
        .map(|category| {
            let threshold = match (mode, *category) {
                (SafetyMode::Nsfw, _) => "BLOCK_NONE",
                (SafetyMode::Sfw, "HARM_CATEGORY_SEXUALLY_EXPLICIT") => "BLOCK_LOW_AND_ABOVE",
                (SafetyMode::Sfw, _) => "BLOCK_MEDIUM_AND_ABOVE",
            };
            SafetySetting {
                category: (*category).to_string(),
                threshold: threshold.to_string(),
            }
        })
        .collect();

    SafetyProfile { settings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_blocks_nothing() {
        let profile = safety_profile(SafetyMode::Nsfw);
        assert_eq!(profile.settings.len(), 4);
        assert!(profile.settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }

    #[test]
    fn strict_is_tighter_on_explicit_content() {
        let profile = safety_profile(SafetyMode::Sfw);
        let explicit = profile
            .settings
            .iter()
            .find(|s| s.category == "HARM_CATEGORY_SEXUALLY_EXPLICIT")
            .unwrap();
        assert_eq!(explicit.threshold, "BLOCK_LOW_AND_ABOVE");
        assert!(profile.settings.iter().all(|s| s.threshold != "BLOCK_NONE"));
    }
}
