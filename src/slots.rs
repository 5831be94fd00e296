use crate::error::{DrawError, DrawResult};

/// A packed 64-bit encoder identifier.
///
/// Layout (low to high): 24-bit slot index, 39-bit unique id, 1-bit
/// built-in flag.
///
/// - **index**: slot in the drawer's encoder table
/// - **unique id**: process-wide counter value assigned when the slot was
///   reserved; if the slot is reused, the new id differs and old handles
///   become stale
/// - **built-in**: the encoder is owned by the drawer (the per-frame
///   encoder) and cannot be disposed by callers
///
/// Equality and hashing compare the packed value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncoderHandle(u64);

impl EncoderHandle {
    const INDEX_BITS: u32 = 24;
    const ID_BITS: u32 = 39;
    const INDEX_MASK: u64 = (1 << Self::INDEX_BITS) - 1;
    const ID_MASK: u64 = (1 << Self::ID_BITS) - 1;
    const BUILTIN_BIT: u64 = 1 << (Self::INDEX_BITS + Self::ID_BITS);

    /// Maximum number of simultaneously reserved encoder slots.
    pub const MAX_SLOTS: usize = 1 << Self::INDEX_BITS;

    pub(crate) fn new(index: usize, unique_id: u64, builtin: bool) -> Self {
        debug_assert!(index < Self::MAX_SLOTS);
        let mut bits = (index as u64 & Self::INDEX_MASK)
            | ((unique_id & Self::ID_MASK) << Self::INDEX_BITS);
        if builtin {
            bits |= Self::BUILTIN_BIT;
        }
        Self(bits)
    }

    pub fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    pub fn unique_id(self) -> u64 {
        (self.0 >> Self::INDEX_BITS) & Self::ID_MASK
    }

    pub fn is_builtin(self) -> bool {
        self.0 & Self::BUILTIN_BIT != 0
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Encoder({}#{}", self.index(), self.unique_id())?;
        if self.is_builtin() {
            f.write_str(", builtin")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Handed out; the encoder is still recording.
    Open,
    /// Submitted; kept reserved until the split job finished.
    Submitted,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    unique_id: u64,
    builtin: bool,
    state: SlotState,
}

/// Free-list allocator for encoder slots.
///
/// Released slots go to a free list and are reused by later reservations
/// with a fresh unique id, so handles to the previous occupant go stale.
#[derive(Debug, Default)]
pub(crate) struct EncoderSlots {
    slots: Vec<Slot>,
    free: Vec<usize>,
    next_id: u64,
    live: usize,
}

impl EncoderSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, builtin: bool) -> EncoderHandle {
        self.next_id = (self.next_id + 1) & EncoderHandle::ID_MASK;
        let unique_id = self.next_id;
        let slot = Slot {
            unique_id,
            builtin,
            state: SlotState::Open,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                assert!(
                    self.slots.len() < EncoderHandle::MAX_SLOTS,
                    "too many live encoders ({}); are encoders being leaked?",
                    self.slots.len()
                );
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.live += 1;
        EncoderHandle::new(index, unique_id, builtin)
    }

    fn slot(&self, handle: EncoderHandle) -> DrawResult<&Slot> {
        match self.slots.get(handle.index()) {
            Some(slot) if slot.unique_id == handle.unique_id() && slot.state != SlotState::Free => {
                Ok(slot)
            }
            _ => Err(DrawError::StaleEncoder(handle.to_bits())),
        }
    }

    /// `Ok` while `handle` refers to an open (still recording) encoder.
    pub fn check_open(&self, handle: EncoderHandle) -> DrawResult<()> {
        match self.slot(handle)?.state {
            SlotState::Open => Ok(()),
            _ => Err(DrawError::StaleEncoder(handle.to_bits())),
        }
    }

    pub fn mark_submitted(&mut self, handle: EncoderHandle) -> DrawResult<()> {
        self.check_open(handle)?;
        self.slots[handle.index()].state = SlotState::Submitted;
        Ok(())
    }

    /// Return the slot to the free list.
    pub fn release(&mut self, handle: EncoderHandle) -> DrawResult<()> {
        self.slot(handle)?;
        self.slots[handle.index()].state = SlotState::Free;
        self.free.push(handle.index());
        self.live -= 1;
        Ok(())
    }

    /// Caller-initiated release: only open, non-built-in encoders.
    pub fn release_by_user(&mut self, handle: EncoderHandle) -> DrawResult<()> {
        let slot = self.slot(handle)?;
        if slot.builtin {
            return Err(DrawError::BuiltinEncoder(handle.to_bits()));
        }
        self.check_open(handle)?;
        self.release(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Free {
                slot.state = SlotState::Free;
                self.free.push(index);
            }
        }
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packing() {
        let handle = EncoderHandle::new(0xAB_CDEF, (1 << 39) - 1, true);
        assert_eq!(handle.index(), 0xAB_CDEF);
        assert_eq!(handle.unique_id(), (1 << 39) - 1);
        assert!(handle.is_builtin());

        let plain = EncoderHandle::new(3, 7, false);
        assert!(!plain.is_builtin());
        assert_ne!(plain, EncoderHandle::new(3, 8, false));
        assert_eq!(format!("{plain:?}"), "Encoder(3#7)");
    }

    #[test]
    fn reuse_invalidates_old_handle() {
        let mut slots = EncoderSlots::new();
        let first = slots.reserve(false);
        slots.release(first).unwrap();

        let second = slots.reserve(false);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(
            slots.check_open(first),
            Err(DrawError::StaleEncoder(first.to_bits()))
        );
        assert!(slots.check_open(second).is_ok());
        assert_eq!(slots.live_count(), 1);
    }

    #[test]
    fn submitted_slot_is_no_longer_open() {
        let mut slots = EncoderSlots::new();
        let handle = slots.reserve(false);
        slots.mark_submitted(handle).unwrap();
        assert!(slots.mark_submitted(handle).is_err());
        assert!(slots.release_by_user(handle).is_err());
        slots.release(handle).unwrap();
        assert!(slots.release(handle).is_err());
    }

    #[test]
    fn builtin_cannot_be_released_by_user() {
        let mut slots = EncoderSlots::new();
        let handle = slots.reserve(true);
        assert_eq!(
            slots.release_by_user(handle),
            Err(DrawError::BuiltinEncoder(handle.to_bits()))
        );
        assert_eq!(slots.live_count(), 1);
    }

    #[test]
    fn clear_frees_everything() {
        let mut slots = EncoderSlots::new();
        let a = slots.reserve(false);
        let _b = slots.reserve(true);
        slots.clear();
        assert_eq!(slots.live_count(), 0);
        assert!(slots.check_open(a).is_err());
    }
}
