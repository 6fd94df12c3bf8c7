//! Voice selection by language and gender preference.

use super::{Voice, VoiceGender};

/// Display-name fragments of common platform voices that are female.
const KNOWN_FEMALE_NAMES: &[&str] = &[
    "zira", "susan", "samantha", "victoria", "tessa", "karen", "moira", "serena", "fiona",
];

/// Which fallback tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Exact language tag, female voice.
    ExactFemale,
    /// Exact language tag, any voice.
    Exact,
    /// Tag starts with the requested language family, female voice.
    FamilyFemale,
    /// Tag starts with the requested language family, any voice.
    Family,
}

/// Normalizes a language tag for comparison: `ta_IN` → `ta-in`.
pub fn normalize_language_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_lowercase()
}

/// Returns the language family of a normalized tag: `ta-in` → `ta`.
pub fn language_family(normalized: &str) -> &str {
    normalized.split('-').next().unwrap_or(normalized)
}

/// Best-effort gender classification.
///
/// A platform-provided gender wins. Otherwise the display name is checked for
/// "female" or a known female voice name. This may misclassify; callers only
/// use it to prefer, never to require.
pub fn is_female_voice(voice: &Voice) -> bool {
    match voice.gender {
        Some(VoiceGender::Female) => true,
        Some(VoiceGender::Male) => false,
        None => {
            let name = voice.name.to_lowercase();
            name.contains("female") || KNOWN_FEMALE_NAMES.iter().any(|n| name.contains(n))
        }
    }
}

/// Picks the best voice for `language_tag`.
///
/// Tiers are tried in order and the first voice (in catalog order) matching a
/// tier wins. Without a female preference only the two "any voice" tiers run.
pub fn select_voice<'a>(
    voices: &'a [Voice],
    language_tag: &str,
    female_preferred: bool,
) -> Option<(&'a Voice, MatchTier)> {
    let wanted = normalize_language_tag(language_tag);
    let family = language_family(&wanted).to_owned();

    let exact = |v: &Voice| normalize_language_tag(&v.language) == wanted;
    let same_family = |v: &Voice| normalize_language_tag(&v.language).starts_with(&family);

    let tiers: &[MatchTier] = if female_preferred {
        &[
            MatchTier::ExactFemale,
            MatchTier::Exact,
            MatchTier::FamilyFemale,
            MatchTier::Family,
        ]
    } else {
        &[MatchTier::Exact, MatchTier::Family]
    };

    tiers.iter().find_map(|&tier| {
        voices
            .iter()
            .find(|v| match tier {
                MatchTier::ExactFemale => exact(v) && is_female_voice(v),
                MatchTier::Exact => exact(v),
                MatchTier::FamilyFemale => same_family(v) && is_female_voice(v),
                MatchTier::Family => same_family(v),
            })
            .map(|v| (v, tier))
    })
}
