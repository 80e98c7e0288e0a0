//! Prep checklist
//!
//! A checklist session belongs to one docket and is consumed by a single run.

use super::EntryId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One delivery line item, optionally bound to staged entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepChecklistItem {
    pub title: String,
    #[serde(default)]
    pub assigned: HashSet<EntryId>,
}

impl PrepChecklistItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            assigned: HashSet::new(),
        }
    }

    pub fn assign(mut self, entry: EntryId) -> Self {
        self.assigned.insert(entry);
        self
    }

    /// Folder name under `CHECKLIST/`
    pub fn folder_name(&self) -> String {
        sanitize_title(&self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepChecklistSession {
    pub docket: String,
    #[serde(default)]
    pub items: Vec<PrepChecklistItem>,
}

impl PrepChecklistSession {
    /// Items a staged entry is assigned to
    pub fn items_for(&self, entry: EntryId) -> Vec<&PrepChecklistItem> {
        self.items
            .iter()
            .filter(|item| item.assigned.contains(&entry))
            .collect()
    }

    pub fn is_assigned(&self, entry: EntryId) -> bool {
        self.items.iter().any(|item| item.assigned.contains(&entry))
    }
}

/// Make a checklist title safe as a single path component
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches('.').trim();
    if trimmed.is_empty() {
        "Untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_title("Radio: 30/15"), "Radio_ 30_15");
        assert_eq!(sanitize_title("  Final   Mix  "), "Final Mix");
        assert_eq!(sanitize_title("..."), "Untitled");
        assert_eq!(sanitize_title(""), "Untitled");
    }

    #[test]
    fn assignment_lookup() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let session = PrepChecklistSession {
            docket: "12345".to_string(),
            items: vec![
                PrepChecklistItem::new("TV Mix").assign(a),
                PrepChecklistItem::new("Radio").assign(a).assign(b),
            ],
        };

        assert_eq!(session.items_for(a).len(), 2);
        assert_eq!(session.items_for(b).len(), 1);
        assert!(!session.is_assigned(Uuid::new_v4()));
    }
}
