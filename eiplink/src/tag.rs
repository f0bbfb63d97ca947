//! Public tag surface. A `Tag` is a named reference to controller memory;
//! operations set trigger flags consumed by the tag's back-end tasklet, and
//! the data buffer is exposed through endian-aware typed accessors. All
//! mutable tag state lives behind one lock; a separate user-visible lock
//! covers multi-call sequences.

use crate::ab;
use crate::attr::Attrs;
use crate::logging::{self, Logger};
use crate::status::Status;
use crate::time;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Poll interval for blocking read/write calls.
const POLL_SLEEP: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Endian {
    Little,
    Big,
}

pub(crate) struct TagState {
    pub(crate) status: Status,
    pub(crate) read_requested: bool,
    pub(crate) write_requested: bool,
    pub(crate) abort_requested: bool,
    pub(crate) destroy_requested: bool,
    pub(crate) backend_started: bool,
    pub(crate) destroyed: bool,
    pub(crate) endian: Endian,
    pub(crate) data: Vec<u8>,
    pub(crate) last_read_ms: u64,
    pub(crate) last_write_ms: u64,
}

pub(crate) struct TagInner {
    pub(crate) attrs: Attrs,
    pub(crate) read_cache_ms: u64,
    pub(crate) log: Logger,
    state: Mutex<TagState>,
    user_locked: Mutex<bool>,
    user_cond: Condvar,
}

/// Request flags snapshotted by the back-end tasklet in one critical
/// section.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Triggers {
    pub read: bool,
    pub write: bool,
    pub abort: bool,
    pub destroy: bool,
}

impl TagInner {
    pub(crate) fn new(attrs: Attrs, log: Logger) -> TagInner {
        let read_cache_ms = attrs.get_int("read_cache_ms", 0).max(0) as u64;

        TagInner {
            attrs,
            read_cache_ms,
            log,
            state: Mutex::new(TagState {
                status: Status::Pending,
                read_requested: false,
                write_requested: false,
                abort_requested: false,
                destroy_requested: false,
                backend_started: false,
                destroyed: false,
                endian: Endian::Little,
                data: Vec::new(),
                last_read_ms: 0,
                last_write_ms: 0,
            }),
            user_locked: Mutex::new(false),
            user_cond: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> MutexGuard<TagState> {
        self.state.lock().expect("Tag lock poisoned")
    }

    #[inline]
    pub(crate) fn status(&self) -> Status {
        self.state().status
    }

    #[inline]
    pub(crate) fn set_status(&self, status: Status) {
        self.state().status = status;
    }

    pub(crate) fn set_backend_started(&self, started: bool) {
        self.state().backend_started = started;
    }

    pub(crate) fn snapshot_triggers(&self) -> Triggers {
        let state = self.state();
        Triggers {
            read: state.read_requested,
            write: state.write_requested,
            abort: state.abort_requested,
            destroy: state.destroy_requested,
        }
    }

    /// Abort processing: drop every trigger; a pending status settles to
    /// ok, a terminal one (e.g. timeout) is left for the caller to see.
    pub(crate) fn clear_triggers_for_abort(&self) {
        let mut state = self.state();
        state.read_requested = false;
        state.write_requested = false;
        state.abort_requested = false;
        if state.status == Status::Pending {
            state.status = Status::Ok;
        }
    }

    pub(crate) fn consume_read_trigger(&self) {
        self.state().read_requested = false;
    }

    pub(crate) fn consume_write_trigger(&self) {
        self.state().write_requested = false;
    }

    /// Fail the active operation: clear the triggers and record the cause.
    pub(crate) fn fail_op(&self, status: Status) {
        let mut state = self.state();
        state.read_requested = false;
        state.write_requested = false;
        state.status = status;
    }

    /// Back end became ready with nothing requested.
    pub(crate) fn promote_ready(&self) {
        let mut state = self.state();
        if state.status == Status::Pending
            && !state.read_requested
            && !state.write_requested
        {
            state.status = Status::Ok;
        }
    }

    pub(crate) fn data_snapshot(&self) -> Vec<u8> {
        self.state().data.clone()
    }

    pub(crate) fn store_read(&self, payload: &[u8], now_ms: u64) {
        let mut state = self.state();
        state.data = payload.to_vec();
        state.last_read_ms = now_ms;
        state.status = Status::Ok;
    }

    pub(crate) fn mark_written(&self, now_ms: u64) {
        let mut state = self.state();
        state.last_write_ms = now_ms;
        state.status = Status::Ok;
    }

    /// Final teardown once the back end has released its resources.
    pub(crate) fn finish_destroy(&self) {
        let mut state = self.state();
        state.data = Vec::new();
        state.backend_started = false;
        state.destroy_requested = false;
        state.destroyed = true;
    }
}

/// Opaque tag handle. Cheap to clone; all clones address the same tag.
#[derive(Clone)]
pub struct Tag {
    inner: Arc<TagInner>,
}

impl Tag {
    /// Create a tag from an attribute string
    /// (`protocol=ab_eip&gateway=10.0.0.1&path=1,0&cpu=lgx&name=Counter`).
    /// A handle is returned even on failure, with the status recorded on
    /// it.
    pub fn create(attr_str: &str) -> Tag {
        let attrs = match Attrs::parse(attr_str) {
            Ok(attrs) => attrs,
            Err(status) => {
                let tag = Tag {
                    inner: Arc::new(TagInner::new(Attrs::empty(), logging::discard())),
                };
                tag.inner.set_status(status);
                return tag;
            }
        };

        let debug = attrs.get_int("debug", 0);
        let name = attrs.get_str("name", "").to_owned();
        let log = logging::for_debug(debug).new(logging::o!("tag" => name));

        logging::debug!(log, "creating tag");

        let inner = Arc::new(TagInner::new(attrs, log));
        let tag = Tag { inner };

        match tag.inner.attrs.get("protocol") {
            Some(protocol)
                if protocol.eq_ignore_ascii_case("ab_eip")
                    || protocol.eq_ignore_ascii_case("ab-eip")
                    || protocol.eq_ignore_ascii_case("ab_io") =>
            {
                ab::create_backend(&tag.inner);
            }
            Some(_) | None => {
                logging::debug!(tag.inner.log, "unknown or missing protocol");
                tag.inner.set_status(Status::BadParam);
            }
        }

        tag
    }

    /// Current status; `Pending` while an operation is in flight.
    pub fn status(&self) -> Status {
        if self.inner.state().destroyed {
            return Status::NullPtr;
        }
        self.inner.status()
    }

    /// Claim the user-visible tag lock. Callers that extract data with
    /// several accessor calls hold this across the sequence; it is distinct
    /// from the internal state lock.
    pub fn lock(&self) -> Status {
        let mut locked = self
            .inner
            .user_locked
            .lock()
            .expect("Tag user lock poisoned");
        while *locked {
            locked = self
                .inner
                .user_cond
                .wait(locked)
                .expect("Tag user lock poisoned");
        }
        *locked = true;
        Status::Ok
    }

    pub fn unlock(&self) -> Status {
        *self
            .inner
            .user_locked
            .lock()
            .expect("Tag user lock poisoned") = false;
        self.inner.user_cond.notify_one();
        Status::Ok
    }

    /// Trigger a read. With a timeout the call polls until the operation
    /// settles or the deadline passes, aborting on expiry. A read landing
    /// inside the cache TTL completes without touching the wire.
    pub fn read(&self, timeout_ms: u64) -> Status {
        {
            let mut state = self.inner.state();

            if state.destroyed {
                return Status::NullPtr;
            }

            if !state.backend_started {
                return state.status;
            }

            if state.last_read_ms + self.inner.read_cache_ms > time::timestamp_millis() {
                logging::debug!(self.inner.log, "returning cached data");
                state.status = Status::Ok;
                return Status::Ok;
            }

            state.read_requested = true;
            state.status = Status::Pending;
        }

        self.wait_for_completion(timeout_ms)
    }

    /// Trigger a write of the current buffer contents. Same timeout
    /// discipline as `read`; no caching.
    pub fn write(&self, timeout_ms: u64) -> Status {
        {
            let mut state = self.inner.state();

            if state.destroyed {
                return Status::NullPtr;
            }

            if !state.backend_started {
                return Status::Create;
            }

            state.write_requested = true;
            state.status = Status::Pending;
        }

        self.wait_for_completion(timeout_ms)
    }

    /// Ask the back end to cancel any in-flight operation. Returns
    /// immediately.
    pub fn abort(&self) -> Status {
        {
            let mut state = self.inner.state();

            if state.destroyed {
                return Status::NullPtr;
            }

            state.abort_requested = true;
            state.status = Status::Ok;
        }

        self.status()
    }

    /// Destroy the tag. With a back end running, the request is handed to
    /// its tasklet so outstanding I/O is released first; otherwise the tag
    /// is torn down directly.
    pub fn destroy(&self) -> Status {
        let has_backend = {
            let mut state = self.inner.state();

            if state.destroyed {
                return Status::NullPtr;
            }

            if state.backend_started {
                state.destroy_requested = true;
                state.status = Status::Ok;
            }

            state.backend_started
        };

        if has_backend {
            self.status()
        } else {
            self.inner.finish_destroy();
            Status::Ok
        }
    }

    /// Size of the data buffer in bytes.
    pub fn size(&self) -> usize {
        self.inner.state().data.len()
    }

    fn wait_for_completion(&self, timeout_ms: u64) -> Status {
        if timeout_ms == 0 {
            return Status::Pending;
        }

        let deadline = time::timestamp_millis() + timeout_ms;
        let mut rc = Status::Pending;

        while rc == Status::Pending && time::timestamp_millis() < deadline {
            rc = self.status();

            if rc != Status::Pending {
                break;
            }

            thread::sleep(POLL_SLEEP);
        }

        if rc == Status::Pending {
            self.abort();
            self.inner.set_status(Status::Timeout);
            rc = Status::Timeout;
        }

        rc
    }
}

/* typed data accessors */

impl Tag {
    pub fn get_u8(&self, offset: usize) -> Result<u8, Status> {
        self.read_at(offset, 1, |bytes, _| bytes[0])
    }

    pub fn set_u8(&self, offset: usize, value: u8) -> Result<(), Status> {
        self.write_at(offset, 1, |bytes, _| bytes[0] = value)
    }

    pub fn get_i8(&self, offset: usize) -> Result<i8, Status> {
        self.read_at(offset, 1, |bytes, _| bytes[0] as i8)
    }

    pub fn set_i8(&self, offset: usize, value: i8) -> Result<(), Status> {
        self.write_at(offset, 1, |bytes, _| bytes[0] = value as u8)
    }

    pub fn get_u16(&self, offset: usize) -> Result<u16, Status> {
        self.read_at(offset, 2, |bytes, endian| match endian {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        })
    }

    pub fn set_u16(&self, offset: usize, value: u16) -> Result<(), Status> {
        self.write_at(offset, 2, |bytes, endian| match endian {
            Endian::Little => LittleEndian::write_u16(bytes, value),
            Endian::Big => BigEndian::write_u16(bytes, value),
        })
    }

    pub fn get_i16(&self, offset: usize) -> Result<i16, Status> {
        self.read_at(offset, 2, |bytes, endian| match endian {
            Endian::Little => LittleEndian::read_i16(bytes),
            Endian::Big => BigEndian::read_i16(bytes),
        })
    }

    pub fn set_i16(&self, offset: usize, value: i16) -> Result<(), Status> {
        self.write_at(offset, 2, |bytes, endian| match endian {
            Endian::Little => LittleEndian::write_i16(bytes, value),
            Endian::Big => BigEndian::write_i16(bytes, value),
        })
    }

    pub fn get_u32(&self, offset: usize) -> Result<u32, Status> {
        self.read_at(offset, 4, |bytes, endian| match endian {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        })
    }

    pub fn set_u32(&self, offset: usize, value: u32) -> Result<(), Status> {
        self.write_at(offset, 4, |bytes, endian| match endian {
            Endian::Little => LittleEndian::write_u32(bytes, value),
            Endian::Big => BigEndian::write_u32(bytes, value),
        })
    }

    pub fn get_i32(&self, offset: usize) -> Result<i32, Status> {
        self.read_at(offset, 4, |bytes, endian| match endian {
            Endian::Little => LittleEndian::read_i32(bytes),
            Endian::Big => BigEndian::read_i32(bytes),
        })
    }

    pub fn set_i32(&self, offset: usize, value: i32) -> Result<(), Status> {
        self.write_at(offset, 4, |bytes, endian| match endian {
            Endian::Little => LittleEndian::write_i32(bytes, value),
            Endian::Big => BigEndian::write_i32(bytes, value),
        })
    }

    /// The 32-bit representation at `offset` is exactly the IEEE-754
    /// encoding with the tag's endianness applied.
    pub fn get_f32(&self, offset: usize) -> Result<f32, Status> {
        self.get_u32(offset).map(f32::from_bits)
    }

    pub fn set_f32(&self, offset: usize, value: f32) -> Result<(), Status> {
        self.set_u32(offset, value.to_bits())
    }

    /// Shared accessor plumbing: the tag must be settled (`Ok`), the buffer
    /// present and `offset + width - 1` inside it. Violations are recorded
    /// on the tag's status as well as returned.
    fn read_at<T>(
        &self,
        offset: usize,
        width: usize,
        decode: impl FnOnce(&[u8], Endian) -> T,
    ) -> Result<T, Status> {
        let rc = self.status();
        if rc != Status::Ok {
            return Err(rc);
        }

        let mut state = self.inner.state();

        if state.data.is_empty() {
            state.status = Status::NullPtr;
            return Err(Status::NullPtr);
        }

        if offset + (width - 1) >= state.data.len() {
            state.status = Status::OutOfBounds;
            return Err(Status::OutOfBounds);
        }

        let value = decode(&state.data[offset..offset + width], state.endian);
        state.status = Status::Ok;

        Ok(value)
    }

    fn write_at(
        &self,
        offset: usize,
        width: usize,
        encode: impl FnOnce(&mut [u8], Endian),
    ) -> Result<(), Status> {
        let rc = self.status();
        if rc != Status::Ok {
            return Err(rc);
        }

        let mut state = self.inner.state();

        if state.data.is_empty() {
            state.status = Status::NullPtr;
            return Err(Status::NullPtr);
        }

        if offset + (width - 1) >= state.data.len() {
            state.status = Status::OutOfBounds;
            return Err(Status::OutOfBounds);
        }

        let endian = state.endian;
        encode(&mut state.data[offset..offset + width], endian);
        state.status = Status::Ok;

        Ok(())
    }
}

impl Tag {
    #[cfg(test)]
    pub(crate) fn from_inner(inner: Arc<TagInner>) -> Tag {
        Tag { inner }
    }
}
