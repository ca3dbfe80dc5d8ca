//! The supervisor's in-memory table of live jailed children.

use std::time::Instant;

use nix::unistd::Pid;

/// Sentinel used as `remote_text` for standalone-mode children, which have
/// no peer address.
pub const STANDALONE_REMOTE_TEXT: &str = "[STANDALONE_MODE]";

#[derive(Debug, Clone)]
pub struct ChildRecord {
    pub pid: Pid,
    pub started_at: Instant,
    pub remote: [u8; 16],
    /// Printable "addr:port", or [`STANDALONE_REMOTE_TEXT`] outside listen_tcp mode.
    pub remote_text: String,
}

#[derive(Debug, Default)]
pub struct Roster {
    children: Vec<ChildRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserted only after the child builder's log pipe has hit EOF, so a
    /// connection is never rate-limited against a child that hasn't actually
    /// entered containment yet.
    pub fn insert(&mut self, record: ChildRecord) {
        self.children.push(record);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<ChildRecord> {
        let idx = self.children.iter().position(|c| c.pid == pid)?;
        Some(self.children.remove(idx))
    }

    pub fn count_for(&self, remote: &[u8; 16]) -> u32 {
        self.children.iter().filter(|c| &c.remote == remote).count() as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildRecord> {
        self.children.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: i32, addr: u8) -> ChildRecord {
        ChildRecord {
            pid: Pid::from_raw(pid),
            started_at: Instant::now(),
            remote: [addr; 16],
            remote_text: STANDALONE_REMOTE_TEXT.to_string(),
        }
    }

    #[test]
    fn counts_only_matching_remote() {
        let mut roster = Roster::new();
        roster.insert(record(1, 1));
        roster.insert(record(2, 1));
        roster.insert(record(3, 2));

        assert_eq!(roster.count_for(&[1; 16]), 2);
        assert_eq!(roster.count_for(&[2; 16]), 1);
        assert_eq!(roster.count_for(&[3; 16]), 0);
    }

    #[test]
    fn remove_drops_exactly_one_matching_pid() {
        let mut roster = Roster::new();
        roster.insert(record(1, 9));
        roster.insert(record(2, 9));

        let removed = roster.remove(Pid::from_raw(1)).expect("present");
        assert_eq!(removed.pid, Pid::from_raw(1));
        assert_eq!(roster.len(), 1);
        assert!(roster.remove(Pid::from_raw(1)).is_none());
    }
}
