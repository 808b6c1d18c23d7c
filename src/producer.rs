//! Writer-side adapter: owns one shared region and publishes into it.

use crate::cell::SwapCell;
use crate::config::region_name;
use crate::error::Result;
use crate::message::Message;
use crate::shm::ShmRegion;

/// The publishing side of one process's exchange region.
///
/// Attaching creates the region named after `index` on a fresh start and
/// reopens it after a crash; either way the cell inside is immediately
/// usable, because its zero state is valid and attach repairs whatever a
/// killed predecessor left half-done.
pub struct Producer {
    shm: ShmRegion,
}

impl Producer {
    /// Attaches to this process's own region, creating it if needed, and
    /// undoes any publish a previous incarnation was killed in the middle
    /// of.
    pub fn attach(prefix: &str, index: usize) -> Result<Self> {
        let shm = ShmRegion::create_or_open(&region_name(prefix, index), SwapCell::<Message>::BYTES)?;
        let producer = Self { shm };
        producer.cell().writer_reset();
        Ok(producer)
    }

    /// Publishes `message` as this process's latest value.
    #[inline]
    pub fn publish(&self, message: Message) -> Result<()> {
        self.cell().writer_publish(message)
    }

    fn cell(&self) -> &SwapCell<Message> {
        // SAFETY: the region was created (or size-validated) with exactly
        // SwapCell::<Message>::BYTES bytes, page alignment exceeds the
        // cell's, and its initial contents were kernel-zeroed.
        unsafe { SwapCell::from_raw(self.shm.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::ShmRegion;

    fn unique_prefix(tag: &str) -> String {
        format!("swapcell_prod_{}_{}", tag, std::process::id())
    }

    #[test]
    fn attach_survives_restart_with_state_intact() {
        let prefix = unique_prefix("restart");
        let name = region_name(&prefix, 0);
        let _ = ShmRegion::unlink(&name);

        let producer = Producer::attach(&prefix, 0).unwrap();
        producer.publish(Message { val: 41 }).unwrap();
        producer.publish(Message { val: 42 }).unwrap();
        drop(producer);

        // A restarted producer reopens the same region; the last published
        // value is still the current one.
        let producer = Producer::attach(&prefix, 0).unwrap();
        let cell = producer.cell();
        let handle = cell.reader_lock(1).unwrap();
        assert_eq!(unsafe { cell.read(handle) }, Message { val: 42 });
        cell.reader_unlock(1, handle).unwrap();

        drop(producer);
        ShmRegion::unlink(&name).unwrap();
    }
}
