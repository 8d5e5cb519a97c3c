//! History of commands sent by the user, browsable with up/down.

use std::collections::VecDeque;

/// Maximum number of commands kept; the oldest ones are dropped first.
pub const HISTORY_LIMIT: usize = 100;

/// Command history with a browsing cursor.
///
/// The cursor is either on a valid entry or on the "live" position past the newest entry,
/// which is where every [`CommandHistory::add`] leaves it.
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    cursor: Option<usize>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `command`, duplicates included, and stop browsing.
    pub fn add(&mut self, command: &str) {
        while self.entries.len() >= HISTORY_LIMIT {
            self.entries.pop_front();
        }

        self.entries.push_back(command.to_string());
        self.cursor = None;
    }

    /// Move towards older entries, stopping at the oldest one.
    ///
    /// Returns an empty string when the history is empty.
    pub fn up(&mut self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let index = match self.cursor {
            Some(i) => i.saturating_sub(1),
            None => self.entries.len() - 1,
        };
        self.cursor = Some(index);
        self.entries[index].clone()
    }

    /// Move towards newer entries. Going past the newest returns `""` and stops browsing.
    pub fn down(&mut self) -> String {
        match self.cursor {
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                self.entries[i + 1].clone()
            }
            _ => {
                self.cursor = None;
                String::new()
            }
        }
    }

    /// Entry under the cursor, or `""` when not browsing.
    pub fn current(&self) -> &str {
        self.cursor
            .and_then(|i| self.entries.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn is_browsing(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn entries(&self) -> &VecDeque<String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_down_walk() {
        let mut history = CommandHistory::new();
        history.add("a");
        history.add("b");
        history.add("c");

        assert_eq!(history.up(), "c");
        assert_eq!(history.up(), "b");
        assert_eq!(history.up(), "a");
        assert_eq!(history.up(), "a");
        assert_eq!(history.down(), "b");
        assert_eq!(history.down(), "c");
        assert_eq!(history.down(), "");
        assert!(!history.is_browsing());
    }

    #[test]
    fn test_empty_history() {
        let mut history = CommandHistory::new();
        assert_eq!(history.up(), "");
        assert_eq!(history.down(), "");
        assert_eq!(history.current(), "");
    }

    #[test]
    fn test_add_resets_cursor_and_keeps_duplicates() {
        let mut history = CommandHistory::new();
        history.add("AT");
        history.add("AT");
        assert_eq!(history.up(), "AT");
        assert_eq!(history.current(), "AT");

        history.add("ATI");
        assert!(!history.is_browsing());
        assert_eq!(history.len(), 3);
        assert_eq!(history.up(), "ATI");
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = CommandHistory::new();
        for i in 0..HISTORY_LIMIT + 10 {
            history.add(&format!("cmd{}", i));
        }
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.entries()[0], "cmd10");
    }
}
