//! Category label translation.
//!
//! Feeds label items in their own language ("Мир", "Экономика"); destinations
//! are keyed by short canonical slugs ("world", "economy"). Labels missing
//! from the table are lower-cased and used as their own slug.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    translations: BTreeMap<String, String>,
}

impl Taxonomy {
    pub fn new(translations: BTreeMap<String, String>) -> Self {
        Self { translations }
    }

    /// Canonical slug for a raw feed label.
    pub fn normalize(&self, label: &str) -> String {
        let label = label.trim();
        match self.translations.get(label) {
            Some(slug) => slug.clone(),
            None => label.to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(
            [("Мир", "world"), ("Экономика", "economy")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn known_labels_translate() {
        assert_eq!(taxonomy().normalize("Мир"), "world");
        assert_eq!(taxonomy().normalize("  Экономика "), "economy");
    }

    #[test]
    fn unknown_labels_are_lowercased() {
        assert_eq!(taxonomy().normalize("Спорт"), "спорт");
        assert_eq!(taxonomy().normalize("World"), "world");
    }

    #[test]
    fn translation_is_case_sensitive_on_input() {
        // "мир" is not in the table, so it passes through lower-cased.
        assert_eq!(taxonomy().normalize("мир"), "мир");
    }
}
