use std::sync::{Arc, Mutex};

use netbuf::Buf;

/// A reusable request record
///
/// Records carry a stable message id (assigned when the pool is
/// built) and a scratch buffer the request frame is serialized into.
/// While a record is out of the pool its id is unique among all
/// in-flight requests by construction.
#[derive(Debug)]
pub struct Record {
    id: u32,
    buf: Buf,
    released: bool,
}

/// A fixed-size pool of request records
///
/// The pool size is the in-flight limit of the client: when it runs
/// dry the caller gets an error instead of an unbounded queue.
#[derive(Clone)]
pub struct RecordPool {
    inner: Arc<Mutex<Vec<Record>>>,
}

impl Record {
    /// The stable message id of this record
    pub fn id(&self) -> u32 {
        self.id
    }
    /// The scratch buffer holding the serialized request
    pub fn buf(&self) -> &Buf {
        &self.buf
    }
    /// Mutable access to the scratch buffer
    pub fn buf_mut(&mut self) -> &mut Buf {
        &mut self.buf
    }
    fn reset(&mut self) {
        let len = self.buf.len();
        if len > 0 {
            self.buf.consume(len);
        }
    }
}

impl RecordPool {
    /// Create a pool of `size` records with ids `1..=size`
    pub fn new(size: usize) -> RecordPool {
        RecordPool {
            inner: Arc::new(Mutex::new(
                (0..size).map(|idx| Record {
                    id: idx as u32 + 1,
                    buf: Buf::new(),
                    released: true,
                }).collect()
            )),
        }
    }
    /// Rent a record; `None` when all of them are in flight
    pub fn rent(&self) -> Option<Record> {
        let mut free = self.inner.lock().expect("record pool lock");
        free.pop().map(|mut record| {
            record.released = false;
            record.reset();
            record
        })
    }
    /// Return a record to the pool
    ///
    /// # Panics
    ///
    /// Panics when the record was already returned; that's always a
    /// logic error in the correlator.
    pub fn dispose(&self, mut record: Record) {
        assert!(!record.released, "request record returned twice");
        record.released = true;
        let mut free = self.inner.lock().expect("record pool lock");
        free.push(record);
    }
    /// Number of records available right now
    pub fn available(&self) -> usize {
        self.inner.lock().expect("record pool lock").len()
    }
}

#[cfg(test)]
mod test {
    use super::RecordPool;

    #[test]
    fn ids_are_stable_and_unique() {
        let pool = RecordPool::new(3);
        let a = pool.rent().unwrap();
        let b = pool.rent().unwrap();
        let c = pool.rent().unwrap();
        assert!(pool.rent().is_none());
        let mut ids = vec![a.id(), b.id(), c.id()];
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        pool.dispose(b);
        let again = pool.rent().unwrap();
        assert_eq!(again.id(), 2);
    }

    #[test]
    fn scratch_is_cleared_on_rent() {
        let pool = RecordPool::new(1);
        let mut rec = pool.rent().unwrap();
        rec.buf_mut().extend(b"leftover");
        pool.dispose(rec);
        let rec = pool.rent().unwrap();
        assert_eq!(rec.buf().len(), 0);
    }

    #[test]
    fn exhaustion_and_refill() {
        let pool = RecordPool::new(2);
        assert_eq!(pool.available(), 2);
        let a = pool.rent().unwrap();
        assert_eq!(pool.available(), 1);
        pool.dispose(a);
        assert_eq!(pool.available(), 2);
    }
}
