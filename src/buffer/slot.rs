use bytes::Bytes;
use std::collections::VecDeque;
use tapedeck_common::TimeRanges;

/// Handle to a buffer slot.
///
/// The generation changes every time the pool is reset for new media, so a
/// handle taken before the reset no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: usize,
    pub generation: u64,
}

/// A write waiting for, or holding, a slot's single write lane.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteTicket {
    pub slot: SlotId,
    pub data: Bytes,
    /// Media time `[start, end)` the bytes cover, when known.
    pub range: Option<(f64, f64)>,
}

/// Byte-accumulating container with a capacity cap.
#[derive(Debug)]
pub(crate) struct BufferSlot {
    chunks: Vec<Bytes>,
    committed: u64,
    reserved: u64,
    capacity: u64,
    full: bool,
    buffered: TimeRanges,
    in_flight: Option<WriteTicket>,
    pending: VecDeque<WriteTicket>,
    /// Activity stamp; larger is more recent.
    last_active: u64,
}

impl BufferSlot {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            chunks: Vec::new(),
            committed: 0,
            reserved: 0,
            capacity,
            full: false,
            buffered: TimeRanges::new(),
            in_flight: None,
            pending: VecDeque::new(),
            last_active: 0,
        }
    }

    /// Bytes settled plus bytes accepted but not yet settled.
    pub(crate) fn projected(&self) -> u64 {
        self.committed + self.reserved
    }

    pub(crate) fn committed(&self) -> u64 {
        self.committed
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.projected() == 0
    }

    pub(crate) fn is_full(&self) -> bool {
        self.full
    }

    pub(crate) fn mark_full(&mut self) {
        self.full = true;
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether `len` more bytes fit under the cap. An empty slot accepts
    /// any single write.
    pub(crate) fn fits(&self, len: u64) -> bool {
        self.is_empty() || self.projected() + len <= self.capacity
    }

    pub(crate) fn buffered(&self) -> &TimeRanges {
        &self.buffered
    }

    pub(crate) fn last_active(&self) -> u64 {
        self.last_active
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Accept a write. Returns the ticket when it owns the write lane now,
    /// or `None` when it was queued behind the in-flight write.
    pub(crate) fn accept(&mut self, ticket: WriteTicket, stamp: u64) -> Option<WriteTicket> {
        self.reserved += ticket.data.len() as u64;
        self.last_active = stamp;
        if self.in_flight.is_some() {
            self.pending.push_back(ticket);
            None
        } else {
            self.in_flight = Some(ticket.clone());
            Some(ticket)
        }
    }

    /// Complete the in-flight write and promote the next pending one.
    ///
    /// Returns `Err(())` when no write is in flight.
    pub(crate) fn settle(
        &mut self,
        buffered: Option<(f64, f64)>,
        stamp: u64,
    ) -> Result<Option<WriteTicket>, ()> {
        let done = self.in_flight.take().ok_or(())?;
        let len = done.data.len() as u64;
        self.reserved -= len;
        self.committed += len;
        self.chunks.push(done.data);
        if let Some((start, end)) = buffered.or(done.range) {
            self.buffered.add(start, end);
        }
        self.last_active = stamp;

        let next = self.pending.pop_front();
        self.in_flight = next.clone();
        Ok(next)
    }

    /// Drop everything, keeping the capacity.
    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }
}
