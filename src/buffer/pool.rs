use super::slot::{BufferSlot, SlotId, WriteTicket};
use crate::config::BufferConfig;
use bytes::Bytes;
use serde::Serialize;
use tapedeck_common::{Direction, Error, Result};

/// Result of appending bytes to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The write owns its slot's write lane; settle it when done.
    Started(WriteTicket),
    /// The write is queued behind the slot's in-flight write.
    Queued(SlotId),
    /// Every slot is full; the write was dropped.
    Exhausted { dropped: u64 },
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub slots: usize,
    pub full_slots: usize,
    pub active: usize,
    pub bytes: u64,
    pub seek_bytes: u64,
    pub pending_writes: usize,
    pub generation: u64,
    pub exhausted: bool,
}

/// Parallel byte-capped slots plus one seek slot.
///
/// Sequential data fills the active slot until its cap, then rolls over to
/// the next one. Seek data goes to a dedicated slot that is never full.
#[derive(Debug)]
pub struct BufferPool {
    /// Regular slots followed by the seek slot.
    slots: Vec<BufferSlot>,
    active: usize,
    generation: u64,
    stamp: u64,
    exhausted: bool,
}

impl BufferPool {
    pub fn new(config: &BufferConfig) -> Self {
        Self::with_slots(config.slot_count, config.slot_capacity_bytes)
    }

    pub fn with_slots(slot_count: usize, capacity: u64) -> Self {
        let slot_count = slot_count.max(1);
        let mut slots: Vec<BufferSlot> = (0..slot_count).map(|_| BufferSlot::new(capacity)).collect();
        slots.push(BufferSlot::new(u64::MAX));
        Self {
            slots,
            active: 0,
            generation: 0,
            stamp: 0,
            exhausted: false,
        }
    }

    /// Number of regular slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn id(&self, index: usize) -> SlotId {
        SlotId {
            index,
            generation: self.generation,
        }
    }

    /// Handle of the slot sequential writes currently go to.
    pub fn active(&self) -> SlotId {
        self.id(self.active)
    }

    /// Handle of the seek slot.
    pub fn seek_slot(&self) -> SlotId {
        self.id(self.slot_count())
    }

    fn next_stamp(&mut self) -> u64 {
        self.stamp += 1;
        self.stamp
    }

    fn resolve(&self, slot: SlotId) -> Result<usize> {
        if slot.generation != self.generation {
            return Err(Error::invalid_state(format!(
                "slot {} is from generation {} (current {})",
                slot.index, slot.generation, self.generation
            )));
        }
        if slot.index >= self.slots.len() {
            return Err(Error::not_found(format!("slot {}", slot.index)));
        }
        Ok(slot.index)
    }

    /// Append sequential bytes to the active slot, rolling over to the next
    /// slot when the cap would be exceeded.
    pub fn append_to_active(&mut self, data: Bytes, range: Option<(f64, f64)>) -> AppendOutcome {
        let len = data.len() as u64;
        loop {
            if self.exhausted {
                tracing::warn!("All buffers full, dropping {} bytes", len);
                return AppendOutcome::Exhausted { dropped: len };
            }
            let slot = &mut self.slots[self.active];
            if !slot.is_full() && slot.fits(len) {
                break;
            }
            slot.mark_full();
            if self.active + 1 >= self.slot_count() {
                self.exhausted = true;
                continue;
            }
            self.active += 1;
            tracing::debug!("Buffer slot {} full, rolling over to {}", self.active - 1, self.active);
        }

        let ticket = WriteTicket {
            slot: self.active(),
            data,
            range,
        };
        let stamp = self.next_stamp();
        match self.slots[self.active].accept(ticket, stamp) {
            Some(ticket) => AppendOutcome::Started(ticket),
            None => AppendOutcome::Queued(self.active()),
        }
    }

    /// Append bytes to the seek slot.
    pub fn append_to_seek(&mut self, data: Bytes, range: Option<(f64, f64)>) -> AppendOutcome {
        let seek = self.seek_slot();
        let ticket = WriteTicket {
            slot: seek,
            data,
            range,
        };
        let stamp = self.next_stamp();
        match self.slots[seek.index].accept(ticket, stamp) {
            Some(ticket) => AppendOutcome::Started(ticket),
            None => AppendOutcome::Queued(seek),
        }
    }

    /// Complete the in-flight write of `slot`, recording `buffered` (or the
    /// ticket's own range), and return the next queued write, if any.
    pub fn settle(&mut self, slot: SlotId, buffered: Option<(f64, f64)>) -> Result<Option<WriteTicket>> {
        let index = self.resolve(slot)?;
        let stamp = self.next_stamp();
        self.slots[index]
            .settle(buffered, stamp)
            .map_err(|_| Error::invalid_state(format!("slot {} has no write in flight", index)))
    }

    pub fn settle_seek(&mut self, buffered: Option<(f64, f64)>) -> Result<Option<WriteTicket>> {
        self.settle(self.seek_slot(), buffered)
    }

    /// Clear every slot for new media. Handles from before the reset go
    /// stale.
    pub fn reset_for_new_media(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.active = 0;
        self.exhausted = false;
        self.generation += 1;
        tracing::debug!("Buffer pool reset, generation {}", self.generation);
    }

    /// Explicitly free a slot. When the pool was exhausted, sequential
    /// writes resume in the freed slot.
    pub fn evict(&mut self, slot: SlotId) -> Result<u64> {
        let index = self.resolve(slot)?;
        if self.slots[index].is_busy() {
            return Err(Error::invalid_state(format!("slot {} has a write in flight", index)));
        }
        let freed = self.slots[index].committed();
        self.slots[index].clear();
        if index < self.slot_count() && self.exhausted {
            self.exhausted = false;
            self.active = index;
        }
        tracing::debug!("Evicted slot {} ({} bytes)", index, freed);
        Ok(freed)
    }

    /// Slot whose buffered ranges hold `time`, most recently active first.
    /// The seek slot is consulted after the regular slots.
    ///
    /// While moving, a slot with data beyond `time` in the direction of
    /// travel is preferred over one whose range ends at `time`.
    pub fn select_buffer_for_time(&self, time: f64, direction: Direction) -> Option<SlotId> {
        let mut order: Vec<usize> = (0..self.slot_count())
            .filter(|&i| !self.slots[i].buffered().is_empty())
            .collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.slots[i].last_active()));
        order.push(self.slot_count());

        let mut fallback = None;
        for index in order {
            let Some((start, end)) = self.slots[index].buffered().find(time) else {
                continue;
            };
            let has_room = match direction {
                Direction::Forward => end - time > 1e-6,
                Direction::Backward => time - start > 1e-6,
                Direction::Stopped => true,
            };
            if has_room {
                return Some(self.id(index));
            }
            fallback.get_or_insert(self.id(index));
        }
        fallback
    }

    /// Buffered time ranges of a slot.
    pub fn buffered(&self, slot: SlotId) -> Result<&tapedeck_common::TimeRanges> {
        let index = self.resolve(slot)?;
        Ok(self.slots[index].buffered())
    }

    /// Settled chunks of a slot, in append order.
    pub fn chunks(&self, slot: SlotId) -> Result<&[Bytes]> {
        let index = self.resolve(slot)?;
        Ok(self.slots[index].chunks())
    }

    /// Settled sequential bytes as a percentage of `total_bytes`.
    pub fn buffered_percent(&self, total_bytes: u64) -> f64 {
        if total_bytes == 0 {
            return 0.0;
        }
        let bytes: u64 = self.slots[..self.slot_count()]
            .iter()
            .map(|s| s.committed())
            .sum();
        (bytes as f64 / total_bytes as f64 * 100.0).min(100.0)
    }

    pub fn stats(&self) -> PoolStats {
        let regular = &self.slots[..self.slot_count()];
        PoolStats {
            slots: self.slot_count(),
            full_slots: regular.iter().filter(|s| s.is_full()).count(),
            active: self.active,
            bytes: regular.iter().map(|s| s.committed()).sum(),
            seek_bytes: self.slots[self.slot_count()].committed(),
            pending_writes: self.slots.iter().map(|s| s.pending_len()).sum(),
            generation: self.generation,
            exhausted: self.exhausted,
        }
    }
}
