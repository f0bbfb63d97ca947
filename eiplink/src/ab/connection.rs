//! CIP connected-messaging layer. One connection per distinct routing path
//! within a session; the Forward Open handshake trades our locally chosen
//! originator id for the target-assigned id used by every subsequent
//! connected request. Connections are shared by tag count and stepped by
//! their own tasklet.

use crate::ab::cip;
use crate::ab::eip;
use crate::ab::request::Request;
use crate::ab::session::Session;
use crate::logging::{self, Logger};
use crate::status::Status;
use crate::tasklet::{self, Step};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Controller families the driver can open connections to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CpuType {
    Plc5,
    Mlgx,
    Lgx,
    M800,
}

impl CpuType {
    /// Forward Open connection parameters word: packet size in the low 9
    /// bits, flags above.
    fn conn_params(self) -> u16 {
        match self {
            CpuType::Plc5 | CpuType::Mlgx => eip::PLC5_CONN_PARAMS,
            CpuType::Lgx | CpuType::M800 => eip::LGX_CONN_PARAMS,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RunState {
    Start,
    BuildFo,
    FoWait,
    Idle,
    Error,
}

struct ConnectionState {
    run_state: RunState,
    status: Status,
    /// Locally chosen originator id, offered in the Forward Open.
    orig_conn_id: u32,
    /// Target-assigned id from the Forward Open reply; addresses all
    /// connected requests.
    targ_conn_id: u32,
    /// Next connection sequence number, assigned in build order.
    conn_seq: u16,
    conn_serial: u16,
    tag_count: usize,
    fo_request: Option<Arc<Request>>,
}

pub struct Connection {
    path: String,
    cpu: CpuType,
    log: Logger,
    session: Weak<Session>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Find the connection for `path` in the session or create one, bumping
    /// its tag count either way. A created connection starts its own
    /// tasklet. Held under the session lock so two tags cannot race the
    /// same path into two connections.
    pub(crate) fn find_or_add(
        session: &Arc<Session>,
        path: &str,
        cpu: CpuType,
        log: &Logger,
    ) -> Arc<Connection> {
        let (connection, created) = session.with_shared(|shared| {
            if let Some(connection) = shared.connections.get(path) {
                connection.inc_tag_count();
                logging::debug!(log, "reusing existing connection"; "path" => path);
                return (connection.clone(), false);
            }

            logging::debug!(log, "creating new connection"; "path" => path);

            shared.conn_serial = shared.conn_serial.wrapping_add(1);
            let connection = Connection::create(session, path, cpu, shared.conn_serial, log);

            shared
                .connections
                .insert(path.to_owned(), connection.clone());

            (connection, true)
        });

        if created {
            let stepped = connection.clone();
            tasklet::spawn(move || stepped.step());
        }

        connection
    }

    fn create(
        session: &Arc<Session>,
        path: &str,
        cpu: CpuType,
        serial: u16,
        log: &Logger,
    ) -> Arc<Connection> {
        Arc::new(Connection {
            path: path.to_owned(),
            cpu,
            log: log.new(logging::o!("path" => path.to_owned())),
            session: Arc::downgrade(session),
            state: Mutex::new(ConnectionState {
                run_state: RunState::Start,
                status: Status::Pending,
                orig_conn_id: u32::from(serial),
                targ_conn_id: 0,
                conn_seq: 1,
                conn_serial: serial,
                tag_count: 1,
                fo_request: None,
            }),
        })
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn inc_tag_count(&self) {
        self.state().tag_count += 1;
    }

    pub fn dec_tag_count(&self) {
        let mut state = self.state();
        state.tag_count = state.tag_count.saturating_sub(1);
    }

    /// Target-assigned connection id; valid once the connection is up.
    #[inline]
    pub fn targ_conn_id(&self) -> u32 {
        self.state().targ_conn_id
    }

    /// Allocate the next connection sequence number.
    pub fn next_conn_seq(&self) -> u16 {
        let mut state = self.state();
        let seq = state.conn_seq;
        state.conn_seq = state.conn_seq.wrapping_add(1);
        seq
    }

    #[inline]
    fn state(&self) -> MutexGuard<ConnectionState> {
        self.state.lock().expect("Connection lock poisoned")
    }

    /// One tasklet step of the connection state machine.
    pub(crate) fn step(&self) -> Step {
        let run_state = self.state().run_state;

        match run_state {
            RunState::Start => {
                let session = match self.session.upgrade() {
                    Some(session) => session,
                    None => return self.fail(Status::NullPtr),
                };

                let session_status = session.status();

                if session_status == Status::Ok {
                    self.state().run_state = RunState::BuildFo;
                } else if session_status.is_err() {
                    self.state().status = session_status;
                    self.state().run_state = RunState::Error;
                }

                Step::Reschedule
            }

            RunState::BuildFo => {
                let session = match self.session.upgrade() {
                    Some(session) => session,
                    None => return self.fail(Status::NullPtr),
                };

                match self.build_forward_open() {
                    Ok(request) => {
                        logging::debug!(self.log, "forward open queued");
                        session.enqueue(request.clone());

                        let mut state = self.state();
                        state.fo_request = Some(request);
                        state.run_state = RunState::FoWait;
                    }
                    Err(status) => {
                        logging::debug!(self.log, "unable to build forward open";
                                        "status" => %status);
                        let mut state = self.state();
                        state.status = status;
                        state.run_state = RunState::Error;
                    }
                }

                Step::Reschedule
            }

            RunState::FoWait => {
                let request = match self.state().fo_request.clone() {
                    Some(request) => request,
                    None => return self.fail(Status::NullPtr),
                };

                if request.status().is_err() {
                    return self.fail(request.status());
                }

                if request.resp_received() {
                    let frame = request.take_response();
                    self.finish_forward_open(&frame);

                    if let Some(session) = self.session.upgrade() {
                        session.remove_request(&request);
                    }
                    self.state().fo_request = None;
                }

                Step::Reschedule
            }

            RunState::Idle => {
                if self.state().tag_count == 0 {
                    return self.close();
                }

                Step::Reschedule
            }

            RunState::Error => {
                if self.state().tag_count == 0 {
                    if let Some(session) = self.session.upgrade() {
                        session.with_shared(|shared| {
                            shared.connections.shift_remove(self.path.as_str());
                        });
                    }
                    return Step::Done;
                }

                Step::Reschedule
            }
        }
    }

    fn build_forward_open(&self) -> Result<Arc<Request>, Status> {
        let path = cip::encode_path(&self.path, false)?;
        let state = self.state();

        let frame = eip::build_forward_open(&eip::ForwardOpenParams {
            orig_conn_id: state.orig_conn_id,
            conn_serial: state.conn_serial,
            conn_params: self.cpu.conn_params(),
            path,
        });

        Ok(Request::new(frame))
    }

    /// Validate the Forward Open reply: encapsulation command, then
    /// encapsulation status, then CIP general status. Success stores the
    /// target-assigned connection id and opens the connection for use.
    fn finish_forward_open(&self, frame: &[u8]) {
        let header = eip::EncapHeader::read(frame);
        let mut state = self.state();

        match header {
            Some(header) if header.command != eip::CMD_SEND_RR_DATA => {
                logging::debug!(self.log, "unexpected eip packet type";
                                "command" => header.command);
                state.status = Status::BadData;
                state.run_state = RunState::Error;
            }
            Some(header) if header.status != 0 => {
                logging::debug!(self.log, "eip command failed";
                                "encap_status" => header.status);
                state.status = Status::RemoteErr;
                state.run_state = RunState::Error;
            }
            Some(_) => match eip::parse_forward_open_reply(frame) {
                Some(reply) if reply.general_status == 0 => {
                    logging::debug!(self.log, "connection set up succeeded";
                                    "conn_id" => reply.conn_id);
                    state.targ_conn_id = reply.conn_id;
                    state.status = Status::Ok;
                    state.run_state = RunState::Idle;
                }
                Some(reply) => {
                    logging::debug!(self.log, "forward open failed";
                                    "general_status" => reply.general_status);
                    state.status = Status::RemoteErr;
                    state.run_state = RunState::Error;
                }
                None => {
                    state.status = Status::BadData;
                    state.run_state = RunState::Error;
                }
            },
            None => {
                state.status = Status::BadData;
                state.run_state = RunState::Error;
            }
        }
    }

    /// Tag count reached zero: send a one-shot Forward Close, detach from
    /// the session and complete the tasklet.
    fn close(&self) -> Step {
        if let Some(session) = self.session.upgrade() {
            if let Ok(path) = cip::encode_path(&self.path, false) {
                let serial = self.state().conn_serial;
                session.enqueue(Request::new_one_shot(eip::build_forward_close(
                    serial, &path,
                )));
            }

            session.with_shared(|shared| {
                shared.connections.shift_remove(self.path.as_str());
            });
        }

        logging::debug!(self.log, "connection closed");

        Step::Done
    }

    fn fail(&self, status: Status) -> Step {
        let mut state = self.state();
        state.status = status;
        state.run_state = RunState::Error;
        Step::Reschedule
    }
}

#[cfg(test)]
impl Connection {
    /// Connection registered on nothing, stepped by tests.
    pub(crate) fn new_detached(
        session: &Arc<Session>,
        path: &str,
        cpu: CpuType,
    ) -> Arc<Connection> {
        Connection::create(session, path, cpu, 1, &crate::logging::discard())
    }

    /// Skip the Forward Open exchange and open the connection directly.
    pub(crate) fn force_open(&self, conn_id: u32) {
        let mut state = self.state();
        state.targ_conn_id = conn_id;
        state.status = Status::Ok;
        state.run_state = RunState::Idle;
    }

    pub(crate) fn force_error(&self, status: Status) {
        let mut state = self.state();
        state.status = status;
        state.run_state = RunState::Error;
    }
}
