use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Languages pinned to the top of the picker.
const FEATURED_LANGUAGES: [&str; 3] = ["English", "Italian", "Spanish"];

/// SeamlessM4T speech-to-text target language names.
const S2TT_TARGET_LANGUAGES: [&str; 36] = [
    "Modern Standard Arabic",
    "Bengali",
    "Catalan",
    "Czech",
    "Mandarin Chinese",
    "Welsh",
    "Danish",
    "German",
    "English",
    "Estonian",
    "Finnish",
    "French",
    "Hindi",
    "Indonesian",
    "Italian",
    "Japanese",
    "Korean",
    "Maltese",
    "Dutch",
    "Western Persian",
    "Polish",
    "Portuguese",
    "Romanian",
    "Russian",
    "Slovak",
    "Spanish",
    "Swedish",
    "Swahili",
    "Telugu",
    "Tagalog",
    "Thai",
    "Turkish",
    "Ukrainian",
    "Urdu",
    "Northern Uzbek",
    "Vietnamese",
];

lazy_static! {
    /// Every language the pickers offer, featured ones first.
    pub static ref SUPPORTED_LANGUAGES: Vec<&'static str> = {
        let mut languages = FEATURED_LANGUAGES.to_vec();
        languages.extend(
            S2TT_TARGET_LANGUAGES
                .iter()
                .filter(|language| !FEATURED_LANGUAGES.contains(language)),
        );
        languages
    };
}

/// A target language the backends accept, by its human-readable name.
///
/// Only constructible through [`Language::parse`]; serde round-trips pass
/// through the same validation so a stale preference file cannot smuggle in
/// an unknown name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        SUPPORTED_LANGUAGES
            .iter()
            .find(|supported| **supported == name)
            .map(|supported| Self((*supported).to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Language {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unknown language: {value}"))
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.0
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn featured_languages_lead_the_menu() {
        assert_eq!(&SUPPORTED_LANGUAGES[..3], ["English", "Italian", "Spanish"]);
    }

    #[test]
    fn menu_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for language in SUPPORTED_LANGUAGES.iter() {
            assert!(seen.insert(language), "{language} listed twice");
        }
    }

    #[test]
    fn parse_accepts_known_languages_only() {
        assert_eq!(Language::parse("Italian").unwrap().name(), "Italian");
        assert!(Language::parse("Klingon").is_none());
        assert!(Language::parse("italian").is_none());
    }

    #[test]
    fn serde_rejects_unknown_names() {
        let known: Language = serde_json::from_str("\"Swahili\"").unwrap();
        assert_eq!(known.name(), "Swahili");
        assert!(serde_json::from_str::<Language>("\"Klingon\"").is_err());
    }
}
