//! Frame-slot retention of GPU resources.
//!
//! With several frames in flight, a buffer handed back by the application may
//! still be read by a command buffer the GPU has not finished. Each frame slot
//! records the keys its commands reference; a retired value stays parked until
//! every slot that referenced it has completed.

use crate::error::{GpuError, Result};

/// When retired resources are released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Release when the fence of every referencing frame slot has signaled.
    #[default]
    PerFrameFence,
    /// Wait for the queue to go idle after each submit and release right away.
    IdleAfterSubmit,
}

/// Per-frame-slot retention table.
///
/// `K` identifies a resource (usually a Vulkan handle), `V` owns it.
pub struct RetentionRing<K, V> {
    /// Keys referenced by the latest recording of each slot.
    slots: Vec<Vec<K>>,
    /// Retired values still referenced by at least one slot.
    parked: Vec<(K, V)>,
}

impl<K: Copy + Eq, V> RetentionRing<K, V> {
    /// Create a ring with one entry per frame slot.
    pub fn new(frames: usize) -> Self {
        Self {
            slots: (0..frames).map(|_| Vec::new()).collect(),
            parked: Vec::new(),
        }
    }

    /// Number of frame slots.
    pub fn frames(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Vec<K>> {
        let frames = self.slots.len();
        self.slots.get_mut(slot).ok_or(GpuError::FrameIndexOutOfRange {
            index: slot,
            frames,
        })
    }

    /// Record that commands recorded into `slot` reference `key`.
    pub fn retain(&mut self, slot: usize, key: K) -> Result<()> {
        let keys = self.slot_mut(slot)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
        Ok(())
    }

    /// Whether any slot still references `key`.
    pub fn is_retained(&self, key: K) -> bool {
        self.slots.iter().any(|keys| keys.contains(&key))
    }

    /// Hand back a resource.
    ///
    /// Returns the value if nothing references it and it can be freed now;
    /// otherwise parks it until [`complete`](Self::complete) releases it.
    pub fn retire(&mut self, key: K, value: V) -> Option<V> {
        if self.is_retained(key) {
            self.parked.push((key, value));
            None
        } else {
            Some(value)
        }
    }

    /// Mark the work of `slot` as finished on the GPU.
    ///
    /// Returns the parked values no slot references anymore.
    pub fn complete(&mut self, slot: usize) -> Result<Vec<V>> {
        self.slot_mut(slot)?.clear();

        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|(key, _)| !self.slots.iter().any(|keys| keys.contains(key)));
        self.parked = kept;

        Ok(released.into_iter().map(|(_, value)| value).collect())
    }

    /// Forget every reference and return all parked values.
    ///
    /// Only valid once the device is idle.
    pub fn drain_all(&mut self) -> Vec<V> {
        for keys in &mut self.slots {
            keys.clear();
        }
        self.parked.drain(..).map(|(_, value)| value).collect()
    }

    /// Number of parked values.
    pub fn pending_count(&self) -> usize {
        self.parked.len()
    }
}

/// A [`RetentionRing`] driven by a [`RetentionPolicy`].
///
/// Renderers call [`before_record`](Self::before_record) before recording
/// into a slot and [`after_submit`](Self::after_submit) after submitting it;
/// the policy decides which of the two waits for the GPU and releases the
/// slot's values. The wait itself is supplied by the caller.
pub struct FrameRetention<K, V> {
    ring: RetentionRing<K, V>,
    policy: RetentionPolicy,
}

impl<K: Copy + Eq, V> FrameRetention<K, V> {
    pub fn new(frames: usize, policy: RetentionPolicy) -> Self {
        Self {
            ring: RetentionRing::new(frames),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Record that commands recorded into `slot` reference `key`.
    pub fn retain(&mut self, slot: usize, key: K) -> Result<()> {
        self.ring.retain(slot, key)
    }

    /// Hand back a resource; `Some` if it can be freed right away.
    pub fn retire(&mut self, key: K, value: V) -> Option<V> {
        self.ring.retire(key, value)
    }

    /// About to record into `slot`.
    ///
    /// Under [`RetentionPolicy::PerFrameFence`], runs `wait_fence` (which
    /// must block until the slot's previous submission has completed) and
    /// returns the values that became free.
    pub fn before_record<E, F>(&mut self, slot: usize, wait_fence: F) -> std::result::Result<Vec<V>, E>
    where
        E: From<GpuError>,
        F: FnOnce() -> std::result::Result<(), E>,
    {
        match self.policy {
            RetentionPolicy::PerFrameFence => {
                wait_fence()?;
                Ok(self.ring.complete(slot)?)
            }
            RetentionPolicy::IdleAfterSubmit => Ok(Vec::new()),
        }
    }

    /// `slot` was just submitted.
    ///
    /// Under [`RetentionPolicy::IdleAfterSubmit`], runs `wait_queue` (which
    /// must block until the queue is idle) and returns the values that
    /// became free.
    pub fn after_submit<E, F>(&mut self, slot: usize, wait_queue: F) -> std::result::Result<Vec<V>, E>
    where
        E: From<GpuError>,
        F: FnOnce() -> std::result::Result<(), E>,
    {
        match self.policy {
            RetentionPolicy::PerFrameFence => Ok(Vec::new()),
            RetentionPolicy::IdleAfterSubmit => {
                wait_queue()?;
                Ok(self.ring.complete(slot)?)
            }
        }
    }

    /// The device went idle; every value is free.
    pub fn after_idle(&mut self) -> Vec<V> {
        self.ring.drain_all()
    }

    /// Number of retired values waiting on in-flight frames.
    pub fn pending_count(&self) -> usize {
        self.ring.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn unreferenced_value_is_returned_immediately() {
        let mut ring: RetentionRing<u32, &str> = RetentionRing::new(2);
        assert_eq!(ring.retire(7, "quad"), Some("quad"));
        assert_eq!(ring.pending_count(), 0);
    }

    #[test]
    fn value_waits_for_its_frame() {
        let mut ring = RetentionRing::new(2);
        ring.retain(0, 7u32).unwrap();

        assert_eq!(ring.retire(7, "quad"), None);
        assert_eq!(ring.pending_count(), 1);

        // Another slot finishing does not release it
        assert!(ring.complete(1).unwrap().is_empty());
        assert_eq!(ring.complete(0).unwrap(), vec!["quad"]);
        assert_eq!(ring.pending_count(), 0);
    }

    #[test]
    fn value_referenced_by_two_frames_waits_for_both() {
        let mut ring = RetentionRing::new(2);
        ring.retain(0, 1u32).unwrap();
        ring.retain(1, 1u32).unwrap();
        assert_eq!(ring.retire(1, 'a'), None);

        assert!(ring.complete(0).unwrap().is_empty());
        assert!(ring.is_retained(1));
        assert_eq!(ring.complete(1).unwrap(), vec!['a']);
    }

    #[test]
    fn duplicate_retain_is_recorded_once() {
        let mut ring: RetentionRing<u32, ()> = RetentionRing::new(1);
        ring.retain(0, 3).unwrap();
        ring.retain(0, 3).unwrap();
        assert_eq!(ring.slots[0].len(), 1);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut ring: RetentionRing<u32, ()> = RetentionRing::new(2);
        assert!(matches!(
            ring.retain(2, 1),
            Err(GpuError::FrameIndexOutOfRange { index: 2, frames: 2 })
        ));
        assert!(ring.complete(5).is_err());
    }

    #[test]
    fn drain_all_releases_everything() {
        let mut ring = RetentionRing::new(3);
        for slot in 0..3 {
            ring.retain(slot, slot as u32).unwrap();
            assert_eq!(ring.retire(slot as u32, slot), None);
        }

        let mut drained = ring.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(!ring.is_retained(0));
        assert_eq!(ring.pending_count(), 0);
    }

    /// Two frames in flight; a buffer drawn in frame N and retired during
    /// frame N+1 must survive until frame N's fence signals.
    #[test]
    fn simulated_two_frame_timeline() {
        let mut ring = RetentionRing::new(2);
        let mut freed = Vec::new();

        // Frame 0 (slot 0) draws buffer 10
        freed.extend(ring.complete(0).unwrap());
        ring.retain(0, 10u32).unwrap();

        // Frame 1 (slot 1) retires buffer 10 while slot 0 is in flight
        freed.extend(ring.complete(1).unwrap());
        assert_eq!(ring.retire(10, "buffer-10"), None);
        assert!(freed.is_empty());

        // Frame 2 reuses slot 0: its fence has signaled
        freed.extend(ring.complete(0).unwrap());
        assert_eq!(freed, vec!["buffer-10"]);
    }

    #[test]
    fn per_frame_fence_waits_before_recording() {
        let mut retention = FrameRetention::new(2, RetentionPolicy::PerFrameFence);
        let waits = Cell::new(0);
        let wait = || -> Result<()> {
            waits.set(waits.get() + 1);
            Ok(())
        };

        assert!(retention.before_record(0, wait).unwrap().is_empty());
        retention.retain(0, 4u32).unwrap();
        assert_eq!(retention.retire(4, "mesh"), None);

        // Submitting never waits under this policy
        assert!(retention.after_submit(0, || -> Result<()> { unreachable!() }).unwrap().is_empty());
        assert!(retention.before_record(1, wait).unwrap().is_empty());
        assert_eq!(retention.pending_count(), 1);

        assert_eq!(retention.before_record(0, wait).unwrap(), vec!["mesh"]);
        assert_eq!(waits.get(), 3);
    }

    #[test]
    fn idle_after_submit_waits_after_submitting() {
        let mut retention = FrameRetention::new(2, RetentionPolicy::IdleAfterSubmit);
        let waits = Cell::new(0);

        assert!(retention
            .before_record(0, || -> Result<()> { unreachable!() })
            .unwrap()
            .is_empty());
        retention.retain(0, 4u32).unwrap();
        assert_eq!(retention.retire(4, "mesh"), None);

        let released = retention
            .after_submit(0, || -> Result<()> {
                waits.set(waits.get() + 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(released, vec!["mesh"]);
        assert_eq!(waits.get(), 1);
    }

    #[test]
    fn failed_wait_releases_nothing() {
        let mut retention = FrameRetention::new(1, RetentionPolicy::PerFrameFence);
        retention.retain(0, 1u32).unwrap();
        assert_eq!(retention.retire(1, ()), None);

        let result = retention.before_record(0, || Err(GpuError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST)));
        assert!(result.is_err());
        assert_eq!(retention.pending_count(), 1);
        assert_eq!(retention.after_idle(), vec![()]);
    }
}
