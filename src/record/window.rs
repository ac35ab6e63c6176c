/// Sliding replay window for DTLS record sequence numbers (RFC 6347 4.1.2.6).
///
/// Keeps the highest authenticated sequence number and a 64-bit bitmap of
/// the 64 numbers below it. A record is checked with [`is_fresh`] before
/// decryption and only [`mark`]ed once it authenticated, so a forged record
/// cannot advance the window.
///
/// The window belongs to one epoch; [`ReplayWindow::reset`] starts over when
/// the read epoch changes.
///
/// [`is_fresh`]: ReplayWindow::is_fresh
/// [`mark`]: ReplayWindow::mark
#[derive(Debug, Default)]
pub struct ReplayWindow {
    max_seq: Option<u64>,
    window: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether `seqno` is neither a duplicate nor too old.
    pub fn is_fresh(&self, seqno: u64) -> bool {
        let Some(max_seq) = self.max_seq else {
            return true;
        };
        if seqno > max_seq {
            return true;
        }
        let offset = max_seq - seqno;
        offset < 64 && (self.window & (1u64 << offset)) == 0
    }

    /// Record `seqno` as received.
    pub fn mark(&mut self, seqno: u64) {
        match self.max_seq {
            Some(max_seq) if seqno <= max_seq => {
                let offset = max_seq - seqno;
                if offset < 64 {
                    self.window |= 1u64 << offset;
                }
            }
            Some(max_seq) => {
                let delta = seqno - max_seq;
                self.window = if delta >= 64 { 0 } else { self.window << delta };
                self.window |= 1;
                self.max_seq = Some(seqno);
            }
            None => {
                self.window = 1;
                self.max_seq = Some(seqno);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(w: &mut ReplayWindow, seq: u64) -> bool {
        let fresh = w.is_fresh(seq);
        if fresh {
            w.mark(seq);
        }
        fresh
    }

    #[test]
    fn accepts_fresh_and_rejects_duplicate() {
        let mut w = ReplayWindow::new();
        assert!(accept(&mut w, 0));
        assert!(!accept(&mut w, 0)); // duplicate
        assert!(accept(&mut w, 1));
    }

    #[test]
    fn accepts_out_of_order_within_window() {
        let mut w = ReplayWindow::new();
        assert!(accept(&mut w, 10));
        assert!(accept(&mut w, 8));
        assert!(!accept(&mut w, 8));
        assert!(accept(&mut w, 9));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = ReplayWindow::new();
        assert!(accept(&mut w, 100));
        // offset 64 is outside the window
        assert!(!accept(&mut w, 36));
        // offset 63 is allowed once
        assert!(accept(&mut w, 37));
        assert!(!accept(&mut w, 37));
    }

    #[test]
    fn large_jump_clears_window() {
        let mut w = ReplayWindow::new();
        assert!(accept(&mut w, 1));
        assert!(accept(&mut w, 80));
        assert!(accept(&mut w, 79));
        assert!(!accept(&mut w, 15));
    }

    #[test]
    fn check_does_not_advance() {
        let mut w = ReplayWindow::new();
        w.mark(5);
        assert!(w.is_fresh(1000));
        // Unauthenticated record 1000 was never marked.
        assert!(w.is_fresh(4));
        w.reset();
        assert!(w.is_fresh(5));
    }
}
