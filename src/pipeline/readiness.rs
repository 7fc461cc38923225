//! First-frame readiness of every slot within a restart epoch

use crate::SlotId;

#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    ready: Vec<bool>,
}

impl ReadinessTracker {
    pub fn new(slot_count: usize) -> Self {
        Self {
            ready: vec![false; slot_count],
        }
    }

    /// Set the slot's flag; true when it was not already set
    pub fn mark(&mut self, slot: SlotId) -> bool {
        match self.ready.get_mut(slot.index()) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self, slot: SlotId) {
        if let Some(flag) = self.ready.get_mut(slot.index()) {
            *flag = false;
        }
    }

    pub fn clear_all(&mut self) {
        self.ready.iter_mut().for_each(|flag| *flag = false);
    }

    pub fn is_ready(&self, slot: SlotId) -> bool {
        self.ready.get(slot.index()).copied().unwrap_or(false)
    }

    pub fn ready_count(&self) -> usize {
        self.ready.iter().filter(|flag| **flag).count()
    }

    pub fn any_ready(&self) -> bool {
        self.ready.iter().any(|flag| *flag)
    }

    pub fn all_ready(&self) -> bool {
        !self.ready.is_empty() && self.ready.iter().all(|flag| *flag)
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_reports_only_the_first_set() {
        let mut tracker = ReadinessTracker::new(3);
        assert!(tracker.mark(SlotId(1)));
        assert!(!tracker.mark(SlotId(1)));
        assert!(tracker.is_ready(SlotId(1)));
        assert_eq!(tracker.ready_count(), 1);
    }

    #[test]
    fn clear_touches_only_one_slot() {
        let mut tracker = ReadinessTracker::new(2);
        tracker.mark(SlotId(0));
        tracker.mark(SlotId(1));
        tracker.clear(SlotId(0));
        assert!(!tracker.is_ready(SlotId(0)));
        assert!(tracker.is_ready(SlotId(1)));
    }

    #[test]
    fn all_ready_needs_every_slot() {
        let mut tracker = ReadinessTracker::new(2);
        tracker.mark(SlotId(0));
        assert!(tracker.any_ready());
        assert!(!tracker.all_ready());
        tracker.mark(SlotId(1));
        assert!(tracker.all_ready());

        tracker.clear_all();
        assert!(!tracker.any_ready());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn out_of_range_slots_are_ignored() {
        let mut tracker = ReadinessTracker::new(1);
        assert!(!tracker.mark(SlotId(5)));
        tracker.clear(SlotId(5));
        assert!(!tracker.is_ready(SlotId(5)));
        assert!(!ReadinessTracker::new(0).all_ready());
    }
}
