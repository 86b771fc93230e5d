//! Buffer Pipe
//!
//! A fixed ring of equally sized buffers carved out of a single storage region and
//! flowing in one direction. The protocol engine works on one side of the ring through
//! [BufferPipe::acquire] and [Grant], the endpoint side moves packets in or out of the
//! ring and reports when a whole buffer has been filled or drained.
//!
//! * [ToHost] - engine fills a buffer and commits it, the endpoint drains it packet by packet
//! * [FromHost] - the endpoint fills a buffer, engine acquires it, consumes it and discards it

use core::borrow::BorrowMut;
use core::cmp::min;
use core::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Direction of a [BufferPipe]
pub trait Direction: sealed::Sealed {
    #[doc(hidden)]
    const FROM_HOST: bool;
}

/// Device to host direction marker
pub struct ToHost;

/// Host to device direction marker
pub struct FromHost;

impl sealed::Sealed for ToHost {}
impl sealed::Sealed for FromHost {}

impl Direction for ToHost {
    const FROM_HOST: bool = false;
}

impl Direction for FromHost {
    const FROM_HOST: bool = true;
}

/// Buffer Pipe error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipeError {
    /// No buffer is ready for the engine side
    Timeout,
    /// A committed byte count exceeds the buffer capacity
    InvalidLength,
}

/// Result of moving a single packet on the endpoint side
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// Nothing to move or the endpoint is busy
    Idle,
    /// A packet moved, the current buffer is not complete yet
    Packet,
    /// The current buffer has been completely drained or filled
    Buffer,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotState {
    Free,
    Acquired,
    Ready,
}

#[derive(Copy, Clone)]
struct Slot {
    state: SlotState,
    occupied: usize, // valid bytes
    pos: usize,      // next byte the endpoint side works on
}

impl Slot {
    const FREE: Slot = Slot {
        state: SlotState::Free,
        occupied: 0,
        pos: 0,
    };
}

/// `N` equally sized buffers flowing in the `Dir` direction
///
/// Buffers are handed out in ring order on both sides, so data leaves the pipe in the
/// order it entered.
pub struct BufferPipe<Dir: Direction, Buf: BorrowMut<[u8]>, const N: usize> {
    storage: Buf,
    slot_len: usize,
    slots: [Slot; N],
    engine: usize,   // next slot the engine side works on
    endpoint: usize, // next slot the endpoint side works on
    expected: usize, // bytes of the armed transfer still expected from the host
    _dir: PhantomData<Dir>,
}

impl<Dir: Direction, Buf: BorrowMut<[u8]>, const N: usize> BufferPipe<Dir, Buf, N> {
    /// Splits `storage` into `N` buffers of equal size
    ///
    /// # Panics
    /// Panics if `N` is zero.
    pub fn new(storage: Buf) -> Self {
        assert!(N > 0);
        let slot_len = storage.borrow().len() / N;
        BufferPipe {
            storage,
            slot_len,
            slots: [Slot::FREE; N],
            engine: 0,
            endpoint: 0,
            expected: 0,
            _dir: PhantomData,
        }
    }

    /// Capacity of a single buffer
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Whether no buffer is acquired, queued or partially filled
    pub fn is_idle(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.state == SlotState::Free && slot.pos == 0)
    }

    /// Drops all queued buffers and returns the number of valid bytes that were
    /// not delivered to their consumer
    pub fn reset(&mut self) -> usize {
        let lost = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Ready)
            .map(|slot| slot.occupied - min(slot.pos, slot.occupied))
            .sum();
        self.slots = [Slot::FREE; N];
        self.engine = 0;
        self.endpoint = 0;
        self.expected = 0;
        lost
    }

    /// Takes the next buffer on the engine side
    ///
    /// Never blocks. A completion of the endpoint side is what makes the next buffer
    /// available.
    ///
    /// # Errors
    /// Returns [PipeError::Timeout] if the next buffer is not ready yet.
    pub fn acquire(&mut self) -> Result<Grant<'_, Dir, Buf, N>, PipeError> {
        let ready = if Dir::FROM_HOST {
            SlotState::Ready
        } else {
            SlotState::Free
        };
        let slot = self.engine;
        if self.slots[slot].state != ready {
            return Err(PipeError::Timeout);
        }
        self.slots[slot].state = SlotState::Acquired;
        Ok(Grant { pipe: self, slot })
    }

    fn slot_buf(&mut self, slot: usize) -> &mut [u8] {
        let len = self.slot_len;
        &mut self.storage.borrow_mut()[slot * len..(slot + 1) * len]
    }

    fn advance_engine(&mut self) {
        self.engine = (self.engine + 1) % N;
    }

    fn advance_endpoint(&mut self) {
        self.endpoint = (self.endpoint + 1) % N;
    }

    fn release(&mut self, slot: usize) {
        if self.slots[slot].state == SlotState::Acquired {
            self.slots[slot] = Slot::FREE;
            if Dir::FROM_HOST {
                self.advance_engine();
            }
        }
    }
}

impl<Buf: BorrowMut<[u8]>, const N: usize> BufferPipe<ToHost, Buf, N> {
    /// Hands the next packet of a committed buffer to `f`
    ///
    /// `f` returns the number of bytes the endpoint accepted, 0 if it is busy.
    pub fn drain_packet<E>(
        &mut self,
        packet_size: usize,
        f: impl FnOnce(&[u8]) -> Result<usize, E>,
    ) -> Result<Progress, E> {
        let slot = self.endpoint;
        let Slot {
            state,
            occupied,
            pos,
        } = self.slots[slot];
        if state != SlotState::Ready {
            return Ok(Progress::Idle);
        }

        let end = min(pos + packet_size, occupied);
        let count = f(&self.slot_buf(slot)[pos..end])?;
        if count == 0 {
            return Ok(Progress::Idle);
        }

        let pos = min(pos + count, occupied);
        if pos == occupied {
            self.slots[slot] = Slot::FREE;
            self.advance_endpoint();
            Ok(Progress::Buffer)
        } else {
            self.slots[slot].pos = pos;
            Ok(Progress::Packet)
        }
    }
}

impl<Buf: BorrowMut<[u8]>, const N: usize> BufferPipe<FromHost, Buf, N> {
    /// Expects `len` more bytes from the host
    pub fn arm(&mut self, len: usize) {
        self.expected = len;
    }

    /// Whether the endpoint side may still receive data
    pub fn is_armed(&self) -> bool {
        self.expected > 0
    }

    /// Lets `f` read the next packet into the current buffer
    ///
    /// `f` returns the number of bytes read, 0 if nothing is available. A buffer is
    /// complete when it is full, when a short packet arrives or when the armed length
    /// has been received. A short packet also ends the armed transfer.
    pub fn fill_packet<E>(
        &mut self,
        packet_size: usize,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<Progress, E> {
        let slot = self.endpoint;
        if self.expected == 0 || self.slots[slot].state != SlotState::Free {
            return Ok(Progress::Idle);
        }

        let pos = self.slots[slot].pos;
        let count = f(&mut self.slot_buf(slot)[pos..])?;
        if count == 0 {
            return Ok(Progress::Idle);
        }

        let pos = min(pos + count, self.slot_len);
        let short = count < packet_size;
        self.expected = if short {
            0
        } else {
            self.expected.saturating_sub(count)
        };

        if short || pos == self.slot_len || self.expected == 0 {
            self.slots[slot] = Slot {
                state: SlotState::Ready,
                occupied: pos,
                pos: 0,
            };
            self.advance_endpoint();
            Ok(Progress::Buffer)
        } else {
            self.slots[slot].pos = pos;
            Ok(Progress::Packet)
        }
    }
}

/// Exclusive access to one buffer of a [BufferPipe]
///
/// Dropping a grant without committing it returns the buffer to the pipe.
pub struct Grant<'p, Dir: Direction, Buf: BorrowMut<[u8]>, const N: usize> {
    pipe: &'p mut BufferPipe<Dir, Buf, N>,
    slot: usize,
}

impl<Dir: Direction, Buf: BorrowMut<[u8]>, const N: usize> Grant<'_, Dir, Buf, N> {
    /// Releases the buffer without passing it on
    pub fn discard(self) {}
}

impl<Buf: BorrowMut<[u8]>, const N: usize> Grant<'_, ToHost, Buf, N> {
    /// The whole empty buffer
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.pipe.slot_buf(self.slot)
    }

    /// Queues the first `len` bytes of the buffer for the endpoint
    ///
    /// Committing zero bytes is the same as discarding.
    ///
    /// # Errors
    /// Returns [PipeError::InvalidLength] if `len` exceeds the buffer. The buffer is
    /// released in that case.
    pub fn commit(self, len: usize) -> Result<(), PipeError> {
        if len > self.pipe.slot_len {
            return Err(PipeError::InvalidLength);
        }
        if len > 0 {
            self.pipe.slots[self.slot] = Slot {
                state: SlotState::Ready,
                occupied: len,
                pos: 0,
            };
            self.pipe.advance_engine();
        }
        Ok(())
    }
}

impl<Buf: BorrowMut<[u8]>, const N: usize> Grant<'_, FromHost, Buf, N> {
    /// Bytes received from the host
    pub fn data(&mut self) -> &[u8] {
        let occupied = self.pipe.slots[self.slot].occupied;
        &self.pipe.slot_buf(self.slot)[..occupied]
    }
}

impl<Dir: Direction, Buf: BorrowMut<[u8]>, const N: usize> Drop for Grant<'_, Dir, Buf, N> {
    fn drop(&mut self) {
        self.pipe.release(self.slot);
    }
}
