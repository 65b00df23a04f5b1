/// Race guards for the single-threaded event loop.
///
/// Nothing here locks. Each guard only records enough about in-progress work
/// for a later event handler to recognize stale or self-caused events.
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use crate::model::{GroupId, TabId};

/// Token identifying one batch of host mutations issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncToken(u64);

#[derive(Debug, Clone, Copy)]
struct SyncMark {
    token: SyncToken,
    expires_at: f64,
}

/// Provenance of pending tab moves.
///
/// Before the engine moves tabs it tags every id with a fresh token. When the
/// host echoes a move event back, the adapter consumes the tag and skips the
/// event. Tags expire after a TTL in case the echo never arrives.
#[derive(Debug, Default)]
pub struct SyncProvenance {
    next_token: u64,
    marks: HashMap<TabId, SyncMark>,
}

impl SyncProvenance {
    pub fn begin(&mut self, tab_ids: &[TabId], now: f64, ttl_ms: f64) -> SyncToken {
        self.next_token += 1;
        let token = SyncToken(self.next_token);
        for tab_id in tab_ids {
            self.marks.insert(
                *tab_id,
                SyncMark {
                    token,
                    expires_at: now + ttl_ms,
                },
            );
        }
        token
    }

    /// True if a live mark covers the tab. Expired marks are pruned.
    pub fn is_marked(&mut self, tab_id: TabId, now: f64) -> bool {
        self.prune(now);
        self.marks.contains_key(&tab_id)
    }

    /// Consume the mark for an echoed event. Returns true if the event was
    /// caused by the engine and should be ignored.
    pub fn consume_echo(&mut self, tab_id: TabId, now: f64) -> bool {
        self.prune(now);
        self.marks.remove(&tab_id).is_some()
    }

    /// Drop the marks of a batch that failed; no echo will come.
    pub fn release(&mut self, token: SyncToken) {
        self.marks.retain(|_, mark| mark.token != token);
    }

    fn prune(&mut self, now: f64) {
        self.marks.retain(|_, mark| mark.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

/// Per-tab debounce for host move events plus the in-flight set.
///
/// `schedule` stamps a generation; after the quiescence window the caller
/// `claim`s with that generation, which only succeeds for the latest event.
#[derive(Debug, Default)]
pub struct MoveDebouncer {
    next_generation: u64,
    pending: HashMap<TabId, u64>,
    in_flight: HashSet<TabId>,
}

impl MoveDebouncer {
    /// Record a move event. `None` means the tab is already being processed
    /// and the event is dropped.
    pub fn schedule(&mut self, tab_id: TabId) -> Option<u64> {
        if self.in_flight.contains(&tab_id) {
            return None;
        }
        self.next_generation += 1;
        self.pending.insert(tab_id, self.next_generation);
        Some(self.next_generation)
    }

    pub fn claim(&mut self, tab_id: TabId, generation: u64) -> bool {
        if self.pending.get(&tab_id) != Some(&generation) || self.in_flight.contains(&tab_id) {
            return false;
        }
        self.pending.remove(&tab_id);
        self.in_flight.insert(tab_id);
        true
    }

    pub fn finish(&mut self, tab_id: TabId) {
        self.in_flight.remove(&tab_id);
    }

    pub fn is_in_flight(&self, tab_id: TabId) -> bool {
        self.in_flight.contains(&tab_id)
    }
}

/// Per-space retry slot. At most one pending retry per space; scheduling or
/// cancelling bumps the generation so older timers find themselves stale.
#[derive(Debug, Default)]
pub struct RetrySlots {
    next_generation: u64,
    pending: HashMap<GroupId, u64>,
}

impl RetrySlots {
    pub fn schedule(&mut self, space_id: GroupId) -> u64 {
        self.next_generation += 1;
        self.pending.insert(space_id, self.next_generation);
        self.next_generation
    }

    pub fn cancel(&mut self, space_id: GroupId) {
        self.pending.remove(&space_id);
    }

    /// Consume the slot if `generation` is still the pending one.
    pub fn take(&mut self, space_id: GroupId, generation: u64) -> bool {
        if self.pending.get(&space_id) == Some(&generation) {
            self.pending.remove(&space_id);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, space_id: GroupId) -> bool {
        self.pending.contains_key(&space_id)
    }

    pub fn rename(&mut self, old_id: GroupId, new_id: GroupId) {
        if let Some(generation) = self.pending.remove(&old_id) {
            self.pending.insert(new_id, generation);
        }
    }
}

/// Nesting counter for an exclusion flag. Overlapping sequences each hold
/// one level; the flag is up while any level is held.
#[derive(Debug, Default)]
pub struct DepthFlag(Cell<u32>);

impl DepthFlag {
    pub fn is_raised(&self) -> bool {
        self.0.get() > 0
    }

    pub fn depth(&self) -> u32 {
        self.0.get()
    }
}

/// One held level of a `DepthFlag`, released on drop.
pub struct FlagGuard<'a> {
    flag: &'a DepthFlag,
}

impl<'a> FlagGuard<'a> {
    pub fn raise(flag: &'a DepthFlag) -> FlagGuard<'a> {
        flag.0.set(flag.0.get() + 1);
        FlagGuard { flag }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.0.set(self.flag.0.get().saturating_sub(1));
    }
}

/// Flags raised around multi-step sequences whose synthetic host events must
/// not be mistaken for user actions.
#[derive(Debug, Default)]
pub struct ExclusionFlags {
    pub creating_space: DepthFlag,
    pub opening_bookmark: DepthFlag,
}

impl ExclusionFlags {
    pub fn any_raised(&self) -> bool {
        self.creating_space.is_raised() || self.opening_bookmark.is_raised()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_consumes_echo_once() {
        let mut provenance = SyncProvenance::default();
        provenance.begin(&[1, 2], 0.0, 500.0);

        assert!(provenance.consume_echo(1, 10.0));
        assert!(!provenance.consume_echo(1, 20.0));
        assert!(provenance.is_marked(2, 30.0));
    }

    #[test]
    fn test_provenance_expires_after_ttl() {
        let mut provenance = SyncProvenance::default();
        provenance.begin(&[1], 0.0, 500.0);

        assert!(!provenance.consume_echo(1, 500.0));
        assert!(provenance.is_empty());
    }

    #[test]
    fn test_provenance_release_only_drops_own_batch() {
        let mut provenance = SyncProvenance::default();
        let first = provenance.begin(&[1], 0.0, 500.0);
        provenance.begin(&[2], 0.0, 500.0);

        provenance.release(first);

        assert!(!provenance.is_marked(1, 1.0));
        assert!(provenance.is_marked(2, 1.0));
        assert_eq!(provenance.len(), 1);
    }

    #[test]
    fn test_provenance_newer_batch_takes_over_mark() {
        let mut provenance = SyncProvenance::default();
        let first = provenance.begin(&[1], 0.0, 500.0);
        provenance.begin(&[1], 0.0, 500.0);

        provenance.release(first);
        assert!(provenance.is_marked(1, 1.0));
    }

    #[test]
    fn test_debounce_only_latest_event_fires() {
        let mut debouncer = MoveDebouncer::default();
        let first = debouncer.schedule(7).unwrap();
        let second = debouncer.schedule(7).unwrap();

        assert!(!debouncer.claim(7, first));
        assert!(debouncer.claim(7, second));
        assert!(debouncer.is_in_flight(7));
    }

    #[test]
    fn test_debounce_drops_events_while_in_flight() {
        let mut debouncer = MoveDebouncer::default();
        let generation = debouncer.schedule(7).unwrap();
        assert!(debouncer.claim(7, generation));

        assert_eq!(debouncer.schedule(7), None);
        debouncer.finish(7);
        assert!(debouncer.schedule(7).is_some());
    }

    #[test]
    fn test_retry_slot_replaced_by_newer_request() {
        let mut slots = RetrySlots::default();
        let old = slots.schedule(3);
        let new = slots.schedule(3);

        assert!(!slots.take(3, old));
        assert!(slots.take(3, new));
        assert!(!slots.is_pending(3));
    }

    #[test]
    fn test_retry_slot_cancel_and_rename() {
        let mut slots = RetrySlots::default();
        let generation = slots.schedule(3);
        slots.rename(3, 9);
        assert!(slots.take(9, generation));

        let generation = slots.schedule(4);
        slots.cancel(4);
        assert!(!slots.take(4, generation));
    }

    #[test]
    fn test_flag_guard_nested_release() {
        let flags = ExclusionFlags::default();
        {
            let _outer = FlagGuard::raise(&flags.creating_space);
            {
                let _inner = FlagGuard::raise(&flags.creating_space);
                assert!(flags.any_raised());
            }
            assert!(flags.creating_space.is_raised());
        }
        assert!(!flags.any_raised());
    }

    #[test]
    fn test_flag_guard_overlapping_sequences_released_in_start_order() {
        let flags = ExclusionFlags::default();
        let first = FlagGuard::raise(&flags.opening_bookmark);
        let second = FlagGuard::raise(&flags.opening_bookmark);
        assert_eq!(flags.opening_bookmark.depth(), 2);

        drop(first);
        assert!(flags.opening_bookmark.is_raised());

        drop(second);
        assert!(!flags.opening_bookmark.is_raised());
        assert!(!flags.any_raised());
    }
}
