//! Descriptor ring.
//!
//! An index-based table with one descriptor per pool slot. Descriptors are
//! created once at start-up, bound permanently to their slot, and referenced by
//! [`RequestContext`] (their index) everywhere else, including inside the
//! stack's completion records.
//!
//! Each descriptor is always in exactly one state:
//!
//! ```text
//!   Refilling ──submit──▶ InFlight ──reclaim──▶ Reclaimed
//!       ▲                                          │
//!       └──────────────── begin_refill ────────────┘
//! ```
//!
//! Only `InFlight` slots belong to the stack. Illegal transitions mean the
//! completion stream disagrees with what was submitted and are reported as
//! [`DescriptorError`]s, which the reactor treats as queue corruption.

use crate::pool::BufferPool;
use crate::queue::{BufferId, RequestContext, RioBuf};
use thiserror::Error;

/// Lifecycle state of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Owned by the stack with an operation outstanding
    InFlight,
    /// Completed and handed back to the reactor
    Reclaimed,
    /// Slot contents and length being prepared for (re)submission
    Refilling,
}

/// Descriptor table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Context does not name a descriptor
    #[error("unknown request context {0}")]
    UnknownContext(RequestContext),

    /// Transition not permitted from the current state
    #[error("descriptor {context} is {actual:?}, expected {expected:?}")]
    InvalidState {
        /// Descriptor
        context: RequestContext,
        /// Required state
        expected: DescriptorState,
        /// Observed state
        actual: DescriptorState,
    },

    /// Length does not fit the slot
    #[error("length {length} exceeds slot size {slot_size} for descriptor {context}")]
    LengthOverflow {
        /// Descriptor
        context: RequestContext,
        /// Requested length
        length: u32,
        /// Slot size
        slot_size: u32,
    },
}

/// One slot's descriptor
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    buf: RioBuf,
    state: DescriptorState,
    last_transferred: u32,
    cycles: u64,
}

impl Descriptor {
    /// Buffer reference submitted to the stack
    #[must_use]
    pub fn buf(&self) -> RioBuf {
        self.buf
    }

    /// Slot offset; fixed for the life of the descriptor
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.buf.offset
    }

    /// Length of the next (or current) operation
    #[must_use]
    pub fn length(&self) -> u32 {
        self.buf.length
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DescriptorState {
        self.state
    }

    /// Bytes moved by the most recent completion
    #[must_use]
    pub fn last_transferred(&self) -> u32 {
        self.last_transferred
    }

    /// Number of completed operations on this descriptor
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Fixed descriptor table
#[derive(Debug)]
pub struct DescriptorTable {
    entries: Vec<Descriptor>,
    slot_size: u32,
    in_flight: usize,
}

impl DescriptorTable {
    /// Bind one descriptor to every slot of `pool`.
    ///
    /// Every descriptor starts in `Refilling` with its length set to the full
    /// slot.
    #[must_use]
    pub fn bind_all(buffer_id: BufferId, pool: &BufferPool) -> Self {
        let entries = (0..pool.slot_count())
            .filter_map(|index| Self::bind(buffer_id, pool, index))
            .collect();

        Self {
            entries,
            slot_size: u32::try_from(pool.slot_size()).unwrap_or(u32::MAX),
            in_flight: 0,
        }
    }

    /// Descriptor over slot `index`
    #[must_use]
    pub fn bind(buffer_id: BufferId, pool: &BufferPool, index: usize) -> Option<Descriptor> {
        let offset = pool.slot_offset(index)?;
        let length = u32::try_from(pool.slot_size()).ok()?;

        Some(Descriptor {
            buf: RioBuf {
                buffer_id,
                offset,
                length,
            },
            state: DescriptorState::Refilling,
            last_transferred: 0,
            cycles: 0,
        })
    }

    /// Number of descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no descriptors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors currently owned by the stack
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Look up a descriptor
    #[must_use]
    pub fn get(&self, context: RequestContext) -> Option<&Descriptor> {
        self.entries.get(context.index())
    }

    /// All contexts in slot order
    pub fn contexts(&self) -> impl Iterator<Item = RequestContext> + use<> {
        (0..self.entries.len() as u32).map(RequestContext)
    }

    /// Iterate over all descriptors
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.iter()
    }

    /// `Refilling` → `InFlight`, after a successful submission
    pub fn mark_in_flight(&mut self, context: RequestContext) -> Result<(), DescriptorError> {
        self.transition(
            context,
            DescriptorState::Refilling,
            DescriptorState::InFlight,
        )?;
        self.in_flight += 1;
        Ok(())
    }

    /// `InFlight` → `Reclaimed`, on completion
    pub fn reclaim(
        &mut self,
        context: RequestContext,
        bytes_transferred: u32,
    ) -> Result<&Descriptor, DescriptorError> {
        self.transition(
            context,
            DescriptorState::InFlight,
            DescriptorState::Reclaimed,
        )?;
        self.in_flight -= 1;

        let entry = &mut self.entries[context.index()];
        entry.last_transferred = bytes_transferred;
        entry.cycles += 1;
        Ok(entry)
    }

    /// `Reclaimed` → `Refilling`, before the slot is rewritten
    pub fn begin_refill(&mut self, context: RequestContext) -> Result<(), DescriptorError> {
        self.transition(
            context,
            DescriptorState::Reclaimed,
            DescriptorState::Refilling,
        )
    }

    /// Set the length of the next operation; only legal while `Refilling`
    pub fn set_length(&mut self, context: RequestContext, length: u32) -> Result<(), DescriptorError> {
        let slot_size = self.slot_size;
        let entry = self.entry_mut(context)?;

        if entry.state != DescriptorState::Refilling {
            return Err(DescriptorError::InvalidState {
                context,
                expected: DescriptorState::Refilling,
                actual: entry.state,
            });
        }

        if length > slot_size {
            return Err(DescriptorError::LengthOverflow {
                context,
                length,
                slot_size,
            });
        }

        entry.buf.length = length;
        Ok(())
    }

    fn entry_mut(&mut self, context: RequestContext) -> Result<&mut Descriptor, DescriptorError> {
        self.entries
            .get_mut(context.index())
            .ok_or(DescriptorError::UnknownContext(context))
    }

    fn transition(
        &mut self,
        context: RequestContext,
        from: DescriptorState,
        to: DescriptorState,
    ) -> Result<(), DescriptorError> {
        let entry = self.entry_mut(context)?;
        if entry.state != from {
            return Err(DescriptorError::InvalidState {
                context,
                expected: from,
                actual: entry.state,
            });
        }
        entry.state = to;
        Ok(())
    }
}
