//! Record catalog: which keys the merge engine understands, and how.
//!
//! Adding a record type means adding one entry to [`STANDARD_ENTRIES`] plus a
//! test for its rule. Keys without an entry are exported verbatim but never
//! merged.

use crate::merge::MergeRule;

/// Record keys as they appear in the store and in snapshot documents.
pub mod keys {
    pub const PRACTICE_SECONDS: &str = "practiceSeconds";
    pub const LISTENING_SECONDS: &str = "listeningSeconds";
    pub const READING_SECONDS: &str = "readingSeconds";
    pub const CONTACTS: &str = "contacts";
    pub const GRAMMAR_MASTERY: &str = "grammarMastery";
    pub const JOURNAL: &str = "journal";
    pub const NOTES: &str = "notes";
    pub const COMPLETED_LESSONS: &str = "completedLessons";
    pub const CALENDAR: &str = "calendar";
    pub const PROGRESS_STATS: &str = "progressStats";
    /// Prefix of the per-contact transcript family (`chat.<contactId>`).
    pub const CHAT_PREFIX: &str = "chat.";
}

/// Counter keys summed into the dashboard's total practice time.
pub const TIME_COUNTERS: [&str; 3] = [
    keys::PRACTICE_SECONDS,
    keys::LISTENING_SECONDS,
    keys::READING_SECONDS,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPattern {
    /// Matches exactly this key.
    Exact(&'static str),
    /// Matches `<prefix><id>` for any non-empty id.
    Family(&'static str),
}

impl KeyPattern {
    #[must_use]
    pub fn matches(self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => key == exact,
            Self::Family(prefix) => key
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub pattern: KeyPattern,
    pub rule: MergeRule,
}

impl CatalogEntry {
    #[must_use]
    pub const fn exact(key: &'static str, rule: MergeRule) -> Self {
        Self {
            pattern: KeyPattern::Exact(key),
            rule,
        }
    }

    #[must_use]
    pub const fn family(prefix: &'static str, rule: MergeRule) -> Self {
        Self {
            pattern: KeyPattern::Family(prefix),
            rule,
        }
    }
}

pub const STANDARD_ENTRIES: &[CatalogEntry] = &[
    CatalogEntry::exact(keys::PRACTICE_SECONDS, MergeRule::Counter),
    CatalogEntry::exact(keys::LISTENING_SECONDS, MergeRule::Counter),
    CatalogEntry::exact(keys::READING_SECONDS, MergeRule::Counter),
    CatalogEntry::exact(keys::CONTACTS, MergeRule::KeyedUnion),
    CatalogEntry::exact(keys::GRAMMAR_MASTERY, MergeRule::KeyedUnion),
    CatalogEntry::exact(keys::JOURNAL, MergeRule::KeyedUnion),
    CatalogEntry::family(keys::CHAT_PREFIX, MergeRule::Transcript),
    CatalogEntry::exact(keys::NOTES, MergeRule::LongestText),
    CatalogEntry::exact(keys::COMPLETED_LESSONS, MergeRule::SetUnion),
    CatalogEntry::exact(keys::CALENDAR, MergeRule::DateFlags),
    CatalogEntry::exact(keys::PROGRESS_STATS, MergeRule::FieldwiseMax),
];

#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalog {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_ENTRIES.to_vec(),
        }
    }

    #[must_use]
    pub fn with_entry(mut self, entry: CatalogEntry) -> Self {
        self.entries.push(entry);
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Merge rule for `key`. Exact entries win over families.
    #[must_use]
    pub fn rule_for(&self, key: &str) -> Option<MergeRule> {
        self.entries
            .iter()
            .find(|entry| matches!(entry.pattern, KeyPattern::Exact(_)) && entry.pattern.matches(key))
            .or_else(|| self.entries.iter().find(|entry| entry.pattern.matches(key)))
            .map(|entry| entry.rule)
    }

    #[must_use]
    pub fn is_known(&self, key: &str) -> bool {
        self.rule_for(key).is_some()
    }
}

/// Store key of the transcript with `contact_id`.
#[must_use]
pub fn chat_key(contact_id: &str) -> String {
    format!("{}{contact_id}", keys::CHAT_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_standard_key_has_a_rule() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.rule_for("practiceSeconds"), Some(MergeRule::Counter));
        assert_eq!(catalog.rule_for("contacts"), Some(MergeRule::KeyedUnion));
        assert_eq!(catalog.rule_for("notes"), Some(MergeRule::LongestText));
        assert_eq!(catalog.rule_for("completedLessons"), Some(MergeRule::SetUnion));
        assert_eq!(catalog.rule_for("calendar"), Some(MergeRule::DateFlags));
        assert_eq!(catalog.rule_for("progressStats"), Some(MergeRule::FieldwiseMax));
    }

    #[test]
    fn chat_family_matches_only_with_contact_id() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.rule_for(&chat_key("maria")), Some(MergeRule::Transcript));
        assert_eq!(catalog.rule_for("chat."), None);
        assert_eq!(catalog.rule_for("chatter"), None);
    }

    #[test]
    fn unknown_keys_have_no_rule() {
        let catalog = Catalog::standard();
        assert!(!catalog.is_known("themePreference"));
        assert!(!catalog.is_known(""));
    }

    #[test]
    fn exact_entry_wins_over_family() {
        let catalog = Catalog::standard()
            .with_entry(CatalogEntry::exact("chat.summary", MergeRule::LongestText));
        assert_eq!(catalog.rule_for("chat.summary"), Some(MergeRule::LongestText));
        assert_eq!(catalog.rule_for("chat.maria"), Some(MergeRule::Transcript));
    }

    #[test]
    fn standard_patterns_do_not_overlap() {
        for (i, a) in STANDARD_ENTRIES.iter().enumerate() {
            for b in &STANDARD_ENTRIES[i + 1..] {
                assert_ne!(a.pattern, b.pattern);
            }
        }
    }
}
