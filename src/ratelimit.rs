//! Per-remote-address connection cap.
//!
//! Comparison is an exact 16-byte match against the roster's recorded
//! remote addresses — no netmask coalescing, and an IPv4-mapped IPv6 peer
//! (`::ffff:a.b.c.d`) only matches another connection from the same mapped
//! form. Whether that should instead unify with a bare IPv4 peer is left
//! open; see the design notes.

use crate::roster::Roster;

/// `cap == 0` means unlimited.
pub fn allow(remote: &[u8; 16], roster: &Roster, cap: u32) -> bool {
    cap == 0 || roster.count_for(remote) < cap
}

#[cfg(test)]
mod tests {
    use nix::unistd::Pid;

    use super::*;
    use crate::roster::ChildRecord;
    use std::time::Instant;

    #[test]
    fn zero_cap_means_unlimited() {
        let roster = Roster::new();
        assert!(allow(&[1; 16], &roster, 0));
    }

    #[test]
    fn blocks_once_cap_reached() {
        let mut roster = Roster::new();
        roster.insert(ChildRecord {
            pid: Pid::from_raw(1),
            started_at: Instant::now(),
            remote: [7; 16],
            remote_text: "[STANDALONE_MODE]".into(),
        });

        assert!(!allow(&[7; 16], &roster, 1));
        assert!(allow(&[7; 16], &roster, 2));
        assert!(allow(&[8; 16], &roster, 1));
    }

    #[test]
    fn ipv4_mapped_form_does_not_match_distinct_bytes() {
        let mut roster = Roster::new();
        let mut mapped = [0u8; 16];
        mapped[10] = 0xff;
        mapped[11] = 0xff;
        mapped[12..16].copy_from_slice(&[192, 0, 2, 1]);
        roster.insert(ChildRecord {
            pid: Pid::from_raw(1),
            started_at: Instant::now(),
            remote: mapped,
            remote_text: "203.0.113.1:443".into(),
        });

        let mut unmapped = [0u8; 16];
        unmapped[12..16].copy_from_slice(&[192, 0, 2, 1]);
        assert!(allow(&unmapped, &roster, 1));
    }
}
