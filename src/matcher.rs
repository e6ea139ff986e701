//! Resolves free text (headlines, company names, extension ids) to an entity slug.

use crate::config::Config;
use crate::models::Entity;

#[derive(Debug, Clone)]
pub struct EntityMatcher {
    /// (slug, lowercase aliases) in declaration order.
    aliases: Vec<(String, Vec<String>)>,
    denylist: Vec<String>,
}

impl EntityMatcher {
    pub fn new(entities: &[Entity], denylist: &[String]) -> Self {
        let aliases = entities
            .iter()
            .map(|entity| {
                let mut names: Vec<String> = entity
                    .aliases
                    .iter()
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty())
                    .collect();
                if names.is_empty() {
                    names.push(entity.slug.to_lowercase());
                    names.push(entity.name.to_lowercase());
                }
                (entity.slug.clone(), names)
            })
            .collect();

        let mut denylist: Vec<String> = denylist
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        // Longest first so a phrase is removed before any phrase it contains.
        denylist.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        Self { aliases, denylist }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.entities, &config.denylist)
    }

    /// First declared entity with an alias contained in `text`, after
    /// denylisted phrases are blanked out.
    pub fn match_text(&self, text: &str) -> Option<&str> {
        let mut normalized = text.to_lowercase();
        for phrase in &self.denylist {
            if normalized.contains(phrase.as_str()) {
                normalized = normalized.replace(phrase.as_str(), " ");
            }
        }

        self.aliases
            .iter()
            .find(|(_, names)| names.iter().any(|n| normalized.contains(n.as_str())))
            .map(|(slug, _)| slug.as_str())
    }

    /// Keeps an explicit slug when it belongs to the roster, otherwise
    /// falls back to matching `text`.
    pub fn resolve(&self, explicit: Option<&str>, text: &str) -> Option<&str> {
        if let Some(slug) = explicit {
            if let Some((known, _)) = self.aliases.iter().find(|(s, _)| s == slug) {
                return Some(known.as_str());
            }
            if let Some(found) = self.match_text(slug) {
                return Some(found);
            }
        }
        self.match_text(text)
    }

    pub fn is_known(&self, slug: &str) -> bool {
        self.aliases.iter().any(|(s, _)| s == slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(entities: &[Entity]) -> EntityMatcher {
        EntityMatcher::new(entities, &["mouse cursor".to_string(), "cursor position".to_string()])
    }

    #[test]
    fn earlier_declared_entity_wins() {
        let m = matcher(&[Entity::new("a", "A", &["foo"]), Entity::new("b", "B", &["foobar"])]);
        assert_eq!(m.match_text("foobar deal"), Some("a"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let m = matcher(&[Entity::new("windsurf", "Windsurf", &["windsurf", "codeium"])]);
        assert_eq!(m.match_text("CODEIUM ships new model"), Some("windsurf"));
        assert_eq!(m.match_text("unrelated headline"), None);
    }

    #[test]
    fn denylisted_phrases_do_not_match() {
        let m = matcher(&[Entity::new("cursor", "Cursor", &["cursor"])]);
        assert_eq!(m.match_text("Fix mouse cursor flicker in terminal"), None);
        assert_eq!(m.match_text("Saving cursor position across reloads"), None);
        assert_eq!(m.match_text("Cursor raises $900M"), Some("cursor"));
        assert_eq!(m.match_text("Cursor fixes mouse cursor bug"), Some("cursor"));
    }

    #[test]
    fn same_text_always_resolves_the_same() {
        let m = matcher(&[Entity::new("a", "A", &["alpha"]), Entity::new("b", "B", &["beta"])]);
        let first = m.match_text("beta and alpha").map(str::to_string);
        for _ in 0..5 {
            assert_eq!(m.match_text("beta and alpha").map(str::to_string), first);
        }
        assert_eq!(first.as_deref(), Some("a"));
    }

    #[test]
    fn resolve_prefers_known_slug() {
        let m = matcher(&[Entity::new("a", "Alpha", &["alpha"]), Entity::new("b", "Beta", &["beta"])]);
        assert_eq!(m.resolve(Some("b"), "alpha news"), Some("b"));
        assert_eq!(m.resolve(Some("Beta Inc"), "alpha news"), Some("b"));
        assert_eq!(m.resolve(Some("gamma"), "alpha news"), Some("a"));
        assert_eq!(m.resolve(None, "nothing here"), None);
    }

    #[test]
    fn empty_aliases_fall_back_to_slug_and_name() {
        let m = matcher(&[Entity::new("tabnine", "Tabnine", &[])]);
        assert_eq!(m.match_text("TabNine adds chat"), Some("tabnine"));
    }
}
