//! Reader-side adapter: follows one peer's exchange region.

use std::thread::sleep;
use std::time::Duration;

use crate::cell::SwapCell;
use crate::config::region_name;
use crate::error::{Result, SwapError};
use crate::message::Message;
use crate::shm::ShmRegion;

/// Delay between attempts to open a peer region its producer has not
/// finished creating yet.
const ATTACH_RETRY: Duration = Duration::from_millis(1);

/// The reading side of one peer's exchange region.
///
/// A consumer pins at most one message at a time; [`Self::lock`] refuses a
/// second lock until [`Self::unlock`]. That per-consumer discipline is what
/// keeps the sizing argument of the cell intact — the cell itself does not
/// police it.
pub struct Consumer {
    shm: ShmRegion,
    process_index: usize,
    producer_index: usize,
    locked: Option<usize>,
}

impl Consumer {
    /// Attaches to the region of `producer_index`, waiting for its producer
    /// to create it, and releases any pins a crashed previous incarnation
    /// of `process_index` still holds there.
    pub fn attach(prefix: &str, process_index: usize, producer_index: usize) -> Result<Self> {
        let name = region_name(prefix, producer_index);
        let size = SwapCell::<Message>::BYTES;

        // The producer creates the object and then grows it; until both
        // steps have happened, "not there yet" and "not sized yet" read
        // the same: try again shortly.
        let shm = loop {
            match ShmRegion::open(&name, size) {
                Ok(shm) => break shm,
                Err(SwapError::ShmOpen { .. } | SwapError::RegionSize { .. }) => {
                    sleep(ATTACH_RETRY)
                }
                Err(err) => return Err(err),
            }
        };

        let consumer = Self {
            shm,
            process_index,
            producer_index,
            locked: None,
        };
        consumer.cell().reader_reset(process_index);
        Ok(consumer)
    }

    /// True once the producer has published at least once.
    #[inline]
    pub fn has_message(&self) -> bool {
        !self.cell().is_empty()
    }

    /// Pins the producer's latest message until [`Self::unlock`].
    ///
    /// Fails with [`SwapError::LockHeld`] if a message is already pinned
    /// and with [`SwapError::Empty`] before the first publication.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked.is_some() {
            return Err(SwapError::LockHeld);
        }
        let handle = self.cell().reader_lock(self.process_index)?;
        self.locked = Some(handle);
        Ok(())
    }

    /// Copy of the currently pinned message.
    pub fn message(&self) -> Result<Message> {
        let handle = self.locked.ok_or(SwapError::NotHeld)?;
        // SAFETY: `locked` is only set by a successful reader_lock and
        // cleared on unlock, so the pin is still held.
        Ok(unsafe { self.cell().read(handle) })
    }

    /// Releases the pinned message.
    pub fn unlock(&mut self) -> Result<()> {
        let handle = self.locked.take().ok_or(SwapError::NotHeld)?;
        self.cell().reader_unlock(self.process_index, handle)
    }

    /// Index of the peer whose region this consumer follows.
    pub fn producer_index(&self) -> usize {
        self.producer_index
    }

    fn cell(&self) -> &SwapCell<Message> {
        // SAFETY: attach validated the region holds at least
        // SwapCell::<Message>::BYTES bytes and the producer laid a cell
        // there; page alignment exceeds the cell's.
        unsafe { SwapCell::from_raw(self.shm.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SLOT_COUNT;
    use crate::producer::Producer;

    fn unique_prefix(tag: &str) -> String {
        format!("swapcell_cons_{}_{}", tag, std::process::id())
    }

    #[test]
    fn consume_latest_message() {
        let prefix = unique_prefix("latest");
        let name = region_name(&prefix, 0);
        let _ = ShmRegion::unlink(&name);

        let producer = Producer::attach(&prefix, 0).unwrap();
        let mut consumer = Consumer::attach(&prefix, 1, 0).unwrap();
        assert!(!consumer.has_message());

        producer.publish(Message { val: 7 }).unwrap();
        assert!(consumer.has_message());
        consumer.lock().unwrap();
        assert_eq!(consumer.message().unwrap(), Message { val: 7 });
        consumer.unlock().unwrap();

        producer.publish(Message { val: 9 }).unwrap();
        consumer.lock().unwrap();
        assert_eq!(consumer.message().unwrap(), Message { val: 9 });
        consumer.unlock().unwrap();

        drop((producer, consumer));
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn single_pin_discipline_is_enforced() {
        let prefix = unique_prefix("discipline");
        let name = region_name(&prefix, 0);
        let _ = ShmRegion::unlink(&name);

        let producer = Producer::attach(&prefix, 0).unwrap();
        let mut consumer = Consumer::attach(&prefix, 1, 0).unwrap();

        assert!(matches!(consumer.message(), Err(SwapError::NotHeld)));
        assert!(matches!(consumer.unlock(), Err(SwapError::NotHeld)));

        producer.publish(Message { val: 1 }).unwrap();
        consumer.lock().unwrap();
        assert!(matches!(consumer.lock(), Err(SwapError::LockHeld)));
        consumer.unlock().unwrap();

        drop((producer, consumer));
        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn reattach_releases_pins_of_a_crashed_reader() {
        let prefix = unique_prefix("crashed");
        let name = region_name(&prefix, 0);
        let _ = ShmRegion::unlink(&name);

        let producer = Producer::attach(&prefix, 0).unwrap();
        let mut consumer = Consumer::attach(&prefix, 1, 0).unwrap();

        // Simulate a reader crashing with a pin held, over and over: the
        // pins pile up until the writer has no slot left.
        for round in 0..SLOT_COUNT {
            producer.publish(Message { val: round as u64 }).unwrap();
            consumer.lock().unwrap();
            consumer.locked = None;
        }
        assert!(matches!(
            producer.publish(Message { val: 99 }),
            Err(SwapError::NoFreeSlot)
        ));

        // The restarted reader's attach resets its pins; publishing works
        // again and the latest value comes through.
        let mut consumer = Consumer::attach(&prefix, 1, 0).unwrap();
        producer.publish(Message { val: 100 }).unwrap();
        consumer.lock().unwrap();
        assert_eq!(consumer.message().unwrap(), Message { val: 100 });
        consumer.unlock().unwrap();

        drop((producer, consumer));
        ShmRegion::unlink(&name).unwrap();
    }
}
