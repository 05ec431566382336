//! Clip rotation scheduler.
//!
//! Re-triggering the same clip slot on consecutive sends makes the engine
//! flicker; instead, sends cycle across `count` slots starting at `base`.

/// Deterministic round-robin over `base .. base + count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipRotation {
    base: u32,
    count: u32,
    /// Offset of the last slot handed out; `None` until the first send
    /// and after a reset.
    last: Option<u32>,
}

impl ClipRotation {
    /// Create a scheduler. `count` below 2 defeats the purpose and is
    /// rejected upstream by settings validation; a stray 0 is clamped so
    /// the arithmetic stays defined.
    pub fn new(base: u32, count: u32) -> Self {
        Self {
            base,
            count: count.max(1),
            last: None,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// The next slot to target: `base + ((k + 1) mod count)`.
    pub fn next_slot(&mut self) -> u32 {
        let next = match self.last {
            None => 0,
            Some(k) => (k + 1) % self.count,
        };
        self.last = Some(next);
        self.base + next
    }

    /// Forget the last offset. Called when base or count changes so a
    /// stale offset cannot point outside the new range.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Adopt a new base/count, resetting only when either changed.
    pub fn reconfigure(&mut self, base: u32, count: u32) {
        let count = count.max(1);
        if self.base != base || self.count != count {
            self.base = base;
            self.count = count;
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_visits_each_slot_once_then_repeats() {
        let mut rot = ClipRotation::new(4, 3);
        let first: Vec<u32> = (0..3).map(|_| rot.next_slot()).collect();
        assert_eq!(first, vec![4, 5, 6]);
        let second: Vec<u32> = (0..3).map(|_| rot.next_slot()).collect();
        assert_eq!(second, first);
    }

    #[test]
    fn reset_restarts_at_base() {
        let mut rot = ClipRotation::new(1, 2);
        assert_eq!(rot.next_slot(), 1);
        assert_eq!(rot.next_slot(), 2);
        rot.reset();
        assert_eq!(rot.next_slot(), 1);
    }

    #[test]
    fn reconfigure_resets_only_on_change() {
        let mut rot = ClipRotation::new(1, 3);
        rot.next_slot();
        rot.next_slot();

        rot.reconfigure(1, 3);
        assert_eq!(rot.next_slot(), 3, "unchanged config keeps the offset");

        rot.reconfigure(1, 2);
        assert_eq!(rot.next_slot(), 1, "changed count restarts the cycle");
    }

    #[test]
    fn zero_count_is_clamped() {
        let mut rot = ClipRotation::new(5, 0);
        assert_eq!(rot.next_slot(), 5);
        assert_eq!(rot.next_slot(), 5);
    }
}
