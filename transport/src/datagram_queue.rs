use bytes::Bytes;

/// A bounded FIFO of outgoing datagrams, backed by a fixed number of slots that are addressed
///  by a front index and a count. It never grows: pushing to a full queue hands the datagram
///  back to the caller.
pub struct DatagramQueue {
    slots: Vec<Option<Bytes>>,
    front: usize,
    pending: usize,
}

impl DatagramQueue {
    pub fn new(capacity: usize) -> DatagramQueue {
        assert!(capacity > 0);
        DatagramQueue {
            slots: vec![None; capacity],
            front: 0,
            pending: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn is_full(&self) -> bool {
        self.pending == self.capacity()
    }

    pub fn push_back(&mut self, datagram: Bytes) -> Result<(), Bytes> {
        if self.is_full() {
            return Err(datagram);
        }

        let idx = (self.front + self.pending) % self.capacity();
        debug_assert!(self.slots[idx].is_none());
        self.slots[idx] = Some(datagram);
        self.pending += 1;
        Ok(())
    }

    pub fn front(&self) -> Option<&Bytes> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.front].as_ref()
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        if self.is_empty() {
            return None;
        }

        let result = self.slots[self.front].take();
        self.front = (self.front + 1) % self.capacity();
        self.pending -= 1;
        result
    }
}
