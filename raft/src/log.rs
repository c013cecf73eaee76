use crate::message::LogEntry;

/// The replicated log, 1-indexed (`log[1]` is the first entry). Volatile:
/// nothing here survives a process restart.
#[derive(Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Log { entries: Vec::new() }
    }

    /// Index of the last entry, or 0 if the log is empty.
    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Term of the last entry, or 0 if the log is empty.
    pub fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    /// Term of the entry at 1-indexed `index`, or 0 if `index` is 0 or out
    /// of range.
    pub fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.entries.get(index as usize - 1).map(|e| e.term).unwrap_or(0)
    }

    pub fn entry_at(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Appends a batch of entries starting at `start_index` (1-indexed),
    /// truncating any conflicting suffix first.
    pub fn append_from(&mut self, start_index: u64, new_entries: &[LogEntry]) {
        let start = start_index as usize - 1;
        self.entries.truncate(start);
        self.entries.extend_from_slice(new_entries);
    }

    /// Entries starting at 1-indexed `from` through the end of the log.
    pub fn entries_from(&self, from: u64) -> Vec<LogEntry> {
        if from == 0 || from as usize - 1 >= self.entries.len() {
            return Vec::new();
        }
        self.entries[from as usize - 1..].to_vec()
    }

    /// Whether `(candidate_last_term, candidate_last_index)` is at least as
    /// up-to-date as this log, per the election-safety rule: higher term
    /// wins, ties broken by longer log.
    pub fn is_at_least_as_up_to_date(&self, candidate_last_term: u64, candidate_last_index: u64) -> bool {
        let our_last_term = self.last_term();
        match candidate_last_term.cmp(&our_last_term) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate_last_index >= self.last_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64) -> LogEntry {
        LogEntry { term, command: serde_json::json!({}) }
    }

    #[test]
    fn empty_log_reports_zero_index_and_term() {
        let log = Log::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(1), 0);
    }

    #[test]
    fn append_from_truncates_conflicting_suffix() {
        let mut log = Log::new();
        log.append(entry(1));
        log.append(entry(1));
        log.append(entry(2));

        log.append_from(2, &[entry(3), entry(3)]);

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.term_at(1), 1);
        assert_eq!(log.term_at(2), 3);
        assert_eq!(log.term_at(3), 3);
    }

    #[test]
    fn up_to_date_check_prefers_higher_term_then_longer_log() {
        let mut log = Log::new();
        log.append(entry(1));
        log.append(entry(2));

        assert!(log.is_at_least_as_up_to_date(3, 0));
        assert!(!log.is_at_least_as_up_to_date(1, 10));
        assert!(log.is_at_least_as_up_to_date(2, 2));
        assert!(!log.is_at_least_as_up_to_date(2, 1));
    }
}
