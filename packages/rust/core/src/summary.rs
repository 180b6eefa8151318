//! Bounded, numbered log of research actions.

use std::collections::VecDeque;

/// History shown to the planner.
///
/// Entries are numbered from 1. Only the newest `max_entries` are kept
/// verbatim; older ones are condensed into a single count line.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    entries: VecDeque<(usize, String)>,
    total: usize,
    max_entries: usize,
}

impl ConversationSummary {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            total: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Append an entry and return its number.
    pub fn record(&mut self, entry: impl Into<String>) -> usize {
        self.total += 1;
        let entry: String = entry.into();
        self.entries.push_back((self.total, entry.trim().replace('\n', " ")));
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.total
    }

    /// Entries recorded so far, including condensed ones.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        let condensed = self.total - self.entries.len();
        match condensed {
            0 => {}
            1 => lines.push("1. (1 earlier action condensed)".to_string()),
            n => lines.push(format!("1-{n}. ({n} earlier actions condensed)")),
        }
        for (number, entry) in &self.entries {
            lines.push(format!("{number}. {entry}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_numbered() {
        let mut summary = ConversationSummary::new(5);
        assert!(summary.is_empty());
        assert_eq!(summary.render(), "");

        summary.record("Fetched wikipedia.org: 3 of 4 categories updated");
        summary.record("Reflected:\nmissing details about her marriage");

        assert_eq!(summary.len(), 2);
        assert_eq!(
            summary.render(),
            "1. Fetched wikipedia.org: 3 of 4 categories updated\n2. Reflected: missing details about her marriage"
        );
    }

    #[test]
    fn old_entries_are_condensed() {
        let mut summary = ConversationSummary::new(2);
        for i in 1..=5 {
            summary.record(format!("action {i}"));
        }

        assert_eq!(summary.len(), 5);
        assert_eq!(
            summary.render(),
            "1-3. (3 earlier actions condensed)\n4. action 4\n5. action 5"
        );
    }
}
