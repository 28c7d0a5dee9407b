//! Available model identifiers and the current selection.

/// Model ids offered by the backend plus the selected one.
///
/// Once the set is non-empty the selection is always one of its members;
/// with an empty set nothing is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRegistry {
    models: Vec<String>,
    selected: Option<String>,
}

impl ModelRegistry {
    /// Replace the set. Empty and repeated names are dropped and the selection
    /// resets to the first remaining model.
    pub fn replace(&mut self, models: Vec<String>) {
        let mut kept: Vec<String> = Vec::with_capacity(models.len());
        for m in models {
            if !m.is_empty() && !kept.contains(&m) {
                kept.push(m);
            }
        }
        self.selected = kept.first().cloned();
        self.models = kept;
    }

    /// Select a model by name. Returns false (and keeps the old selection) for unknown names.
    pub fn select(&mut self, name: &str) -> bool {
        if !self.models.iter().any(|m| m == name) {
            return false;
        }
        self.selected = Some(name.to_string());
        true
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Selected model id, or "" when the set is empty.
    pub fn selected(&self) -> &str {
        self.selected.as_deref().unwrap_or("")
    }
}
