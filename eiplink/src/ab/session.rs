//! EIP session layer. One session owns the TCP connection to one
//! (host, port) gateway, registers itself with the peer, serializes
//! outbound requests and demultiplexes inbound responses back onto the
//! originating requests. Sessions are shared by tag count and stepped by
//! their own tasklet.

use crate::ab::connection::Connection;
use crate::ab::eip;
use crate::ab::request::Request;
use crate::logging::{self, Logger};
use crate::status::{Status, TxError, TxResult};
use crate::tasklet::{self, Step};
use hashbrown::HashMap;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};

/// Byte stream the session talks to. `TcpStream` in production; tests
/// install an in-memory mock.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RunState {
    Start,
    Idle,
    Close,
    Error,
}

/// Socket half of the session, touched only by the session tasklet.
struct SessionIo {
    state: RunState,
    stream: Option<Box<dyn Transport>>,
    recv_data: Vec<u8>,
    has_response: bool,
}

/// State shared with tag and connection tasklets.
pub(crate) struct SessionShared {
    pub(crate) status: Status,
    pub(crate) session_handle: u32,
    /// Next unconnected sequence id; strictly increasing, never zero.
    pub(crate) session_seq_id: u64,
    pub(crate) conn_serial: u16,
    pub(crate) tag_count: usize,
    pub(crate) requests: Vec<Arc<Request>>,
    pub(crate) current: Option<Arc<Request>>,
    pub(crate) connections: IndexMap<String, Arc<Connection>>,
}

pub struct Session {
    host: String,
    port: u16,
    log: Logger,
    io: Mutex<SessionIo>,
    shared: Mutex<SessionShared>,
}

/// Process-wide session table, keyed by (host, port). Sessions to the same
/// host on different ports are distinct.
struct Driver {
    sessions: Mutex<HashMap<(String, u16), Arc<Session>>>,
}

lazy_static! {
    static ref DRIVER: Driver = Driver {
        sessions: Mutex::new(HashMap::new()),
    };
}

impl Session {
    /// Find the session for (host, port) or create one, bumping its tag
    /// count either way. A created session starts its own tasklet.
    pub(crate) fn find_or_add(host: &str, port: u16, log: &Logger) -> Arc<Session> {
        let key = (host.to_ascii_lowercase(), port);
        let mut sessions = DRIVER.sessions.lock().expect("Session table lock poisoned");

        if let Some(session) = sessions.get(&key) {
            session.inc_tag_count();
            logging::debug!(log, "reusing existing session"; "host" => host, "port" => port);
            return session.clone();
        }

        logging::debug!(log, "creating new session"; "host" => host, "port" => port);

        let session = Arc::new(Session::new(host, port, log));
        sessions.insert(key, session.clone());

        let stepped = session.clone();
        tasklet::spawn(move || stepped.step());

        session
    }

    pub(crate) fn new(host: &str, port: u16, log: &Logger) -> Session {
        Session {
            host: host.to_owned(),
            port,
            log: log.new(logging::o!("session" => format!("{}:{}", host, port))),
            io: Mutex::new(SessionIo {
                state: RunState::Start,
                stream: None,
                recv_data: Vec::with_capacity(eip::MAX_REQ_RESP_SIZE),
                has_response: false,
            }),
            shared: Mutex::new(SessionShared {
                status: Status::Pending,
                session_handle: 0,
                session_seq_id: 1,
                conn_serial: 0,
                tag_count: 1,
                requests: Vec::new(),
                current: None,
                connections: IndexMap::new(),
            }),
        }
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.shared().status
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.shared().status = status;
    }

    pub fn inc_tag_count(&self) {
        self.shared().tag_count += 1;
    }

    pub fn dec_tag_count(&self) {
        let mut shared = self.shared();
        shared.tag_count = shared.tag_count.saturating_sub(1);
    }

    fn tag_count(&self) -> usize {
        self.shared().tag_count
    }

    /// Append a request to the transmit queue.
    pub(crate) fn enqueue(&self, request: Arc<Request>) {
        self.shared().requests.push(request);
    }

    /// Unlink a request its owner is done with.
    pub(crate) fn remove_request(&self, request: &Arc<Request>) {
        let mut shared = self.shared();

        shared.requests.retain(|queued| !Arc::ptr_eq(queued, request));

        let drop_current = shared
            .current
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, request));
        if drop_current {
            shared.current = None;
        }
    }

    pub(crate) fn with_shared<R>(&self, f: impl FnOnce(&mut SessionShared) -> R) -> R {
        f(&mut self.shared())
    }

    #[inline]
    fn shared(&self) -> MutexGuard<SessionShared> {
        self.shared.lock().expect("Session lock poisoned")
    }

    #[inline]
    fn io(&self) -> MutexGuard<SessionIo> {
        self.io.lock().expect("Session io lock poisoned")
    }

    /// Tests drive the session without a tasklet or a real socket.
    #[cfg(test)]
    pub(crate) fn install_stream(&self, stream: Box<dyn Transport>) {
        let mut io = self.io();
        io.stream = Some(stream);
        io.state = RunState::Idle;
    }

    /// One tasklet step of the session state machine.
    pub(crate) fn step(&self) -> Step {
        let state = self.io().state;

        match state {
            RunState::Start => {
                logging::trace!(self.log, "opening session socket");

                match self.open_socket() {
                    Ok(stream) => {
                        let mut io = self.io();
                        io.stream = Some(stream);
                        io.state = RunState::Idle;
                    }
                    Err(status) => {
                        logging::debug!(self.log, "session socket setup failed";
                                        "status" => %status);
                        self.set_status(status);
                        self.io().state = RunState::Error;
                        return Step::Reschedule;
                    }
                }

                self.enqueue(Request::new_one_shot(eip::build_register_session()));

                Step::Reschedule
            }

            RunState::Idle => {
                if self.tag_count() == 0 {
                    self.io().state = RunState::Close;
                    return Step::Reschedule;
                }

                match self.do_io() {
                    Ok(()) | Err(TxError::Wait) => {}
                    Err(TxError::Fatal(status)) => {
                        logging::debug!(self.log, "session io error"; "status" => %status);
                        self.set_status(status);
                        self.io().state = RunState::Error;
                    }
                }

                Step::Reschedule
            }

            RunState::Close => {
                logging::debug!(self.log, "closing session");
                self.io().stream = None;
                DRIVER.remove(&self.host, self.port);
                Step::Done
            }

            RunState::Error => {
                self.io().stream = None;
                self.fail_queued_requests();

                if self.tag_count() == 0 {
                    DRIVER.remove(&self.host, self.port);
                    return Step::Done;
                }

                Step::Reschedule
            }
        }
    }

    fn open_socket(&self) -> Result<Box<dyn Transport>, Status> {
        let stream =
            TcpStream::connect((self.host.as_str(), self.port)).map_err(|_| Status::Open)?;
        stream.set_nonblocking(true).map_err(|_| Status::Open)?;
        Ok(Box::new(stream))
    }

    /// One I/O pass: pull in any response and dispatch it, then advance the
    /// transmit side.
    pub(crate) fn do_io(&self) -> TxResult<()> {
        self.check_incoming()?;
        self.check_outgoing()
    }

    fn check_incoming(&self) -> TxResult<()> {
        let frame = {
            let mut io = self.io();
            let io_ref = &mut *io;

            if !io_ref.has_response {
                if let Some(stream) = io_ref.stream.as_mut() {
                    match recv_frame(stream, &mut io_ref.recv_data) {
                        Ok(true) => io_ref.has_response = true,
                        Ok(false) | Err(TxError::Wait) => {}
                        Err(fatal) => return Err(fatal),
                    }
                }
            }

            if io_ref.has_response {
                io_ref.has_response = false;
                Some(std::mem::replace(
                    &mut io_ref.recv_data,
                    Vec::with_capacity(eip::MAX_REQ_RESP_SIZE),
                ))
            } else {
                None
            }
        };

        match frame {
            Some(frame) => self.dispatch_response(&frame),
            None => Ok(()),
        }
    }

    fn dispatch_response(&self, frame: &[u8]) -> TxResult<()> {
        let header = match eip::EncapHeader::read(frame) {
            Some(header) => header,
            None => return Ok(()),
        };

        if header.command == eip::CMD_REGISTER_SESSION {
            if header.status != 0 {
                logging::debug!(self.log, "session registration rejected";
                                "encap_status" => header.status);
                return Err(TxError::Fatal(Status::RemoteErr));
            }

            let mut shared = self.shared();
            shared.session_handle = header.session_handle;
            shared.status = Status::Ok;

            logging::debug!(self.log, "session registered";
                            "handle" => header.session_handle);

            return Ok(());
        }

        let keys = if header.command == eip::CMD_SEND_UNIT_DATA {
            match eip::connected_keys(frame) {
                Some(keys) => Some(keys),
                // Unframeable connected reply; nothing can own it.
                None => return Ok(()),
            }
        } else {
            None
        };

        let matched = {
            let shared = self.shared();
            shared
                .requests
                .iter()
                .find(|request| {
                    let state = request.lock();
                    match keys {
                        Some((conn_id, conn_seq)) => {
                            state.conn_id == conn_id && state.conn_seq == conn_seq
                        }
                        None => {
                            header.sender_context != 0
                                && state.session_seq_id == header.sender_context
                        }
                    }
                })
                .cloned()
        };

        match matched {
            Some(request) => {
                logging::trace!(self.log, "matched response"; "size" => frame.len());

                let mut state = request.lock();
                state.data = frame.to_vec();
                state.resp_received = true;
                state.send_request = false;
                state.send_in_progress = false;
                state.recv_in_progress = false;
            }
            None => {
                // Likely a response to an already-aborted request.
                logging::trace!(self.log, "discarding unmatched response";
                                "command" => header.command);
            }
        }

        Ok(())
    }

    fn check_outgoing(&self) -> TxResult<()> {
        let request = {
            let mut shared = self.shared();
            let shared_ref = &mut *shared;
            let current = shared_ref.current.clone();

            // Drop aborted requests, but never one mid-transmission; cutting
            // a packet short would corrupt the stream.
            shared_ref.requests.retain(|request| {
                let aborted = request.lock().abort_request;
                let is_current = current
                    .as_ref()
                    .map_or(false, |c| Arc::ptr_eq(c, request));
                !(aborted && !is_current)
            });

            if let Some(current) = shared_ref.current.clone() {
                if !current.lock().send_request {
                    // Finished in some manner; free the transmit slot.
                    shared_ref.current = None;
                }
            }

            if shared_ref.current.is_none() {
                shared_ref.current = shared_ref
                    .requests
                    .iter()
                    .find(|request| request.lock().send_request)
                    .cloned();
            }

            if let Some(request) = shared_ref.current.clone() {
                let mut state = request.lock();

                if !state.send_in_progress {
                    // Unconnected requests take their sequence id just
                    // before the first byte goes out; it is the demux key
                    // echoed back in the sender context.
                    if eip::command(&state.data) == eip::CMD_SEND_RR_DATA {
                        let seq = shared_ref.session_seq_id;
                        shared_ref.session_seq_id += 1;
                        state.session_seq_id = seq;
                        eip::patch_sender_context(&mut state.data, seq);
                    }

                    eip::patch_session_handle(&mut state.data, shared_ref.session_handle);
                    state.offset = 0;
                    state.send_in_progress = true;
                }

                drop(state);
                Some(request)
            } else {
                None
            }
        };

        let request = match request {
            Some(request) => request,
            None => return Ok(()),
        };

        match self.send_request_bytes(&request) {
            Ok(true) => {
                let mut state = request.lock();
                state.send_request = false;
                state.send_in_progress = false;
                state.offset = 0;

                if state.abort_after_send {
                    state.abort_request = true;
                } else {
                    state.recv_in_progress = true;
                }

                drop(state);
                self.shared().current = None;
            }
            Ok(false) | Err(TxError::Wait) => {}
            Err(TxError::Fatal(status)) => {
                // Recorded on the request for its owner; the session keeps
                // serving the rest of the queue.
                let mut state = request.lock();
                state.status = status;
                state.send_request = false;
                state.send_in_progress = false;
                state.recv_in_progress = false;

                drop(state);
                self.shared().current = None;
            }
        }

        Ok(())
    }

    /// Attempt one non-blocking write of the unsent slice. Returns whether
    /// the request is fully on the wire.
    fn send_request_bytes(&self, request: &Arc<Request>) -> TxResult<bool> {
        let mut io = self.io();
        let stream = match io.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(TxError::Fatal(Status::Write)),
        };

        let mut state = request.lock();
        let offset = state.offset;

        match stream.write(&state.data[offset..]) {
            Ok(0) => Err(TxError::Fatal(Status::Write)),
            Ok(count) => {
                state.offset += count;
                Ok(state.offset >= state.data.len())
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(TxError::Wait),
            Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => Err(TxError::Wait),
            Err(_) => Err(TxError::Fatal(Status::Write)),
        }
    }

    /// Publish the session's terminal status into every queued request so
    /// waiting owners observe a non-pending state.
    fn fail_queued_requests(&self) {
        let mut shared = self.shared();
        let status = if shared.status.is_err() {
            shared.status
        } else {
            Status::RemoteErr
        };

        for request in shared.requests.drain(..) {
            let mut state = request.lock();
            state.status = status;
            state.send_request = false;
            state.send_in_progress = false;
            state.recv_in_progress = false;
        }

        shared.current = None;
    }
}

impl Driver {
    fn remove(&self, host: &str, port: u16) {
        self.sessions
            .lock()
            .expect("Session table lock poisoned")
            .remove(&(host.to_ascii_lowercase(), port));
    }
}

/// Read towards one complete encapsulation frame: first the 24-byte header,
/// then header plus the promised payload. Returns whether the frame is
/// complete; "would block" with a partial frame is not an error.
fn recv_frame<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> TxResult<bool> {
    loop {
        let needed = if buf.len() < eip::ENCAP_HEADER_SIZE {
            eip::ENCAP_HEADER_SIZE
        } else {
            eip::ENCAP_HEADER_SIZE + eip::payload_len(buf)
        };

        if needed > eip::MAX_REQ_RESP_SIZE {
            return Err(TxError::Fatal(Status::BadData));
        }

        if buf.len() >= needed {
            return Ok(true);
        }

        let mut chunk = [0u8; eip::MAX_REQ_RESP_SIZE];
        let want = needed - buf.len();

        match stream.read(&mut chunk[..want]) {
            Ok(0) => return Err(TxError::Fatal(Status::Read)),
            Ok(count) => buf.extend_from_slice(&chunk[..count]),
            Err(err) => {
                return match TxError::from(err) {
                    TxError::Wait => Ok(false),
                    fatal => Err(fatal),
                };
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use std::cmp::min;
    use std::io;

    /// In-memory transport with per-call chunk limits and WouldBlock once
    /// the scripted input runs dry.
    pub(crate) struct MockStream {
        read_data: Arc<Mutex<Vec<u8>>>,
        read_at: usize,
        written: Arc<Mutex<Vec<u8>>>,
        read_chunk: usize,
        write_chunk: usize,
    }

    pub(crate) struct MockHandles {
        pub read_data: Arc<Mutex<Vec<u8>>>,
        pub written: Arc<Mutex<Vec<u8>>>,
    }

    impl MockStream {
        pub(crate) fn new(read_chunk: usize, write_chunk: usize) -> (MockStream, MockHandles) {
            let read_data = Arc::new(Mutex::new(Vec::new()));
            let written = Arc::new(Mutex::new(Vec::new()));

            let stream = MockStream {
                read_data: read_data.clone(),
                read_at: 0,
                written: written.clone(),
                read_chunk,
                write_chunk,
            };

            (
                stream,
                MockHandles {
                    read_data,
                    written,
                },
            )
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.read_data.lock().unwrap();

            if self.read_at >= data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let count = min(min(self.read_chunk, buf.len()), data.len() - self.read_at);
            buf[..count].copy_from_slice(&data[self.read_at..self.read_at + count]);
            self.read_at += count;

            Ok(count)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let count = min(self.write_chunk, buf.len());
            self.written.lock().unwrap().extend_from_slice(&buf[..count]);
            Ok(count)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn mock_session(
        read_chunk: usize,
        write_chunk: usize,
    ) -> (Arc<Session>, MockHandles) {
        let session = Arc::new(Session::new("10.0.0.1", eip::DEFAULT_PORT, &crate::logging::discard()));
        let (stream, handles) = MockStream::new(read_chunk, write_chunk);
        session.install_stream(Box::new(stream));
        (session, handles)
    }

    fn register_reply(handle: u32) -> Vec<u8> {
        let mut frame = eip::build_register_session();
        eip::patch_session_handle(&mut frame, handle);
        frame
    }

    #[test]
    fn test_session_registration_success() {
        let (session, handles) = mock_session(600, 600);
        session.enqueue(Request::new_one_shot(eip::build_register_session()));

        // First pass transmits the registration request.
        session.do_io().unwrap();
        assert_eq!(handles.written.lock().unwrap().len(), 28);
        assert_eq!(session.status(), Status::Pending);

        // Reply arrives; second pass consumes it and stores the handle.
        handles
            .read_data
            .lock()
            .unwrap()
            .extend_from_slice(&register_reply(0xCAFE_F00D));
        session.do_io().unwrap();

        assert_eq!(session.status(), Status::Ok);
        assert_eq!(session.with_shared(|s| s.session_handle), 0xCAFE_F00D);
        // The one-shot was aborted after send and swept from the queue.
        assert_eq!(session.with_shared(|s| s.requests.len()), 0);
    }

    #[test]
    fn test_registration_failure_is_fatal() {
        let (session, handles) = mock_session(600, 600);

        let mut reply = eip::build_register_session();
        LittleEndian::write_u32(&mut reply[8..12], 1); // encap status
        handles.read_data.lock().unwrap().extend_from_slice(&reply);

        assert_eq!(
            session.do_io(),
            Err(TxError::Fatal(Status::RemoteErr))
        );
    }

    #[test]
    fn test_subsequent_requests_carry_session_handle() {
        let (session, handles) = mock_session(600, 600);
        session.with_shared(|s| {
            s.session_handle = 0xDDCC_BBAA;
            s.status = Status::Ok;
        });

        let request = Request::new(eip::build_rr_data(&[0x01]));
        session.enqueue(request);
        session.do_io().unwrap();

        let written = handles.written.lock().unwrap();
        assert_eq!(LittleEndian::read_u32(&written[4..]), 0xDDCC_BBAA);
    }

    #[test]
    fn test_unconnected_seq_ids_strictly_increase() {
        let (session, handles) = mock_session(600, 600);

        let first = Request::new(eip::build_rr_data(&[0x01]));
        let second = Request::new(eip::build_rr_data(&[0x02]));
        session.enqueue(first.clone());
        session.enqueue(second.clone());

        // One transmission per pass.
        session.do_io().unwrap();
        session.do_io().unwrap();

        let first_seq = first.lock().session_seq_id;
        let second_seq = second.lock().session_seq_id;
        assert_eq!(first_seq, 1);
        assert_eq!(second_seq, 2);

        // The sender context on the wire matches the recorded ids.
        let written = handles.written.lock().unwrap();
        assert_eq!(LittleEndian::read_u64(&written[12..]), 1);
        let second_frame = &written[written.len() / 2..];
        assert_eq!(LittleEndian::read_u64(&second_frame[12..]), 2);
    }

    #[test]
    fn test_unconnected_response_demux() {
        let (session, handles) = mock_session(600, 600);

        let first = Request::new(eip::build_rr_data(&[0x01]));
        let second = Request::new(eip::build_rr_data(&[0x02]));
        session.enqueue(first.clone());
        session.enqueue(second.clone());

        session.do_io().unwrap();
        session.do_io().unwrap();

        // A reply carrying the second request's sequence id.
        let mut reply = eip::build_rr_data(&[0xEE]);
        eip::patch_sender_context(&mut reply, 2);
        handles.read_data.lock().unwrap().extend_from_slice(&reply);

        session.do_io().unwrap();

        assert!(!first.resp_received());
        assert!(second.resp_received());
        assert_eq!(second.lock().data.len(), reply.len());
    }

    #[test]
    fn test_connected_response_demux() {
        let (session, handles) = mock_session(600, 600);

        let cip = [0x52, 0x00];
        let frame = eip::build_unit_data(0xDEADBEEF, 7, &cip);
        let request = Request::new_connected(frame, 0xDEADBEEF, 7);
        session.enqueue(request.clone());
        session.do_io().unwrap();

        // Mismatched sequence number is discarded, matching one lands.
        let miss = eip::build_unit_data(0xDEADBEEF, 8, &[0xD2, 0, 0, 0]);
        handles.read_data.lock().unwrap().extend_from_slice(&miss);
        session.do_io().unwrap();
        assert!(!request.resp_received());

        let hit = eip::build_unit_data(0xDEADBEEF, 7, &[0xD2, 0, 0, 0]);
        handles.read_data.lock().unwrap().extend_from_slice(&hit);
        session.do_io().unwrap();
        assert!(request.resp_received());
    }

    #[test]
    fn test_response_assembled_from_partial_reads() {
        let (session, handles) = mock_session(5, 600);
        session.with_shared(|s| s.status = Status::Ok);

        let request = Request::new(eip::build_rr_data(&[0x01]));
        session.enqueue(request.clone());
        session.do_io().unwrap();

        let mut reply = eip::build_rr_data(&[0xEE, 0xFF]);
        eip::patch_sender_context(&mut reply, 1);
        handles.read_data.lock().unwrap().extend_from_slice(&reply);

        // 5-byte read chunks force several passes across the header and
        // payload boundaries; none of them may fail.
        for _ in 0..20 {
            session.do_io().unwrap();
            if request.resp_received() {
                break;
            }
        }

        assert!(request.resp_received());
        assert_eq!(request.lock().data, reply);
    }

    #[test]
    fn test_partial_writes_resume() {
        let (session, handles) = mock_session(600, 8);

        let request = Request::new(eip::build_rr_data(&[0x01, 0x02, 0x03]));
        let expected_len = request.lock().data.len();
        session.enqueue(request.clone());

        for _ in 0..16 {
            session.do_io().unwrap();
            if !request.lock().send_request {
                break;
            }
        }

        let written = handles.written.lock().unwrap();
        assert_eq!(written.len(), expected_len);
        assert!(request.lock().recv_in_progress);
    }

    #[test]
    fn test_aborted_request_swept_unless_current() {
        let (session, _handles) = mock_session(600, 4);

        let first = Request::new(eip::build_rr_data(&[0x01]));
        let second = Request::new(eip::build_rr_data(&[0x02]));
        session.enqueue(first.clone());
        session.enqueue(second.clone());

        // Start transmitting the first request (write chunk 4 keeps it
        // mid-flight), then abort both.
        session.do_io().unwrap();
        first.abort();
        second.abort();
        session.do_io().unwrap();

        // The queued request is gone; the current one survives the sweep.
        let remaining = session.with_shared(|s| s.requests.len());
        assert_eq!(remaining, 1);
        assert!(session.with_shared(|s| {
            s.requests
                .iter()
                .any(|r| Arc::ptr_eq(r, &first))
        }));
    }

    #[test]
    fn test_no_data_is_not_an_error() {
        let (session, _handles) = mock_session(600, 600);

        // Nothing to read, nothing to send.
        assert_eq!(session.do_io(), Ok(()));
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let (session, handles) = mock_session(600, 600);

        let mut frame = eip::build_register_session();
        LittleEndian::write_u16(&mut frame[2..4], 0xFFFF);
        handles.read_data.lock().unwrap().extend_from_slice(&frame);

        assert_eq!(session.do_io(), Err(TxError::Fatal(Status::BadData)));
    }

    #[test]
    fn test_peer_close_is_fatal() {
        struct ClosedStream;

        impl Read for ClosedStream {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }

        impl Write for ClosedStream {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let session = Session::new("10.0.0.1", eip::DEFAULT_PORT, &crate::logging::discard());
        session.install_stream(Box::new(ClosedStream));

        assert_eq!(session.do_io(), Err(TxError::Fatal(Status::Read)));
    }
}
