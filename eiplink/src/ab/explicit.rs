//! Explicit (Logix) tag back end. Reads and writes travel as connected
//! messages on the tag's Forward Open connection: CIP Read Tag Fragmented
//! (0x52) and Write Tag Fragmented (0x53) wrapped in Send-Unit-Data. The
//! per-tag tasklet consumes the trigger flags in priority order — destroy,
//! abort, write, read — and releases the shared session and connection on
//! destroy.

use crate::ab;
use crate::ab::cip;
use crate::ab::connection::{Connection, CpuType};
use crate::ab::eip;
use crate::ab::request::Request;
use crate::ab::session::Session;
use crate::logging::{self, Logger};
use crate::status::Status;
use crate::tag::TagInner;
use crate::tasklet::{self, Step};
use crate::time;
use byteorder::{LittleEndian, WriteBytesExt};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Op {
    Read,
    Write,
}

struct Pending {
    op: Op,
    request: Arc<Request>,
}

struct ExplicitContext {
    tag: Arc<TagInner>,
    session: Arc<Session>,
    connection: Arc<Connection>,
    pending: Option<Pending>,
    /// CIP type info from the last successful read; writes echo it back.
    type_info: Option<[u8; 2]>,
    log: Logger,
}

/// Wire the tag to its session and connection and start the back-end
/// tasklet. The tag stays pending until the connection reports ready.
pub(crate) fn create(tag: &Arc<TagInner>, cpu: CpuType) -> Status {
    let gateway = match ab::get_gateway(&tag.attrs) {
        Some(gateway) => gateway,
        None => {
            logging::debug!(tag.log, "no gateway and no usable path");
            tag.set_status(Status::BadParam);
            return Status::BadParam;
        }
    };

    let port = tag.attrs.get_int("port", i64::from(eip::DEFAULT_PORT)) as u16;
    let path = tag.attrs.get_str("path", "").to_owned();

    let session = Session::find_or_add(&gateway, port, &tag.log);
    let connection = Connection::find_or_add(&session, &path, cpu, &tag.log);

    let mut context = ExplicitContext {
        tag: tag.clone(),
        session,
        connection,
        pending: None,
        type_info: None,
        log: tag.log.new(logging::o!()),
    };

    tag.set_backend_started(true);

    tasklet::spawn(move || context.step());

    Status::Ok
}

impl ExplicitContext {
    fn step(&mut self) -> Step {
        let triggers = self.tag.snapshot_triggers();

        if triggers.destroy {
            return self.destroy();
        }

        if triggers.abort {
            logging::debug!(self.log, "aborting in-flight operation");

            if let Some(pending) = self.pending.take() {
                // The session sweeps it off the queue on its next pass.
                pending.request.abort();
            }

            self.tag.clear_triggers_for_abort();
            return Step::Reschedule;
        }

        if self.pending.is_some() {
            return self.poll_pending();
        }

        if triggers.write {
            return self.start_op(Op::Write);
        }

        if triggers.read {
            return self.start_op(Op::Read);
        }

        // Nothing requested; surface back-end readiness or failure.
        let conn_status = self.connection.status();
        if conn_status == Status::Ok {
            self.tag.promote_ready();
        } else if conn_status.is_err() {
            self.tag.set_status(conn_status);
        } else if self.session.status().is_err() {
            self.tag.set_status(self.session.status());
        }

        Step::Reschedule
    }

    fn start_op(&mut self, op: Op) -> Step {
        let conn_status = self.connection.status();

        if conn_status == Status::Pending {
            // Connection still opening; the trigger stays set.
            return Step::Reschedule;
        }

        if conn_status.is_err() {
            self.tag.fail_op(conn_status);
            return Step::Reschedule;
        }

        let cip = match self.build_cip(op) {
            Ok(cip) => cip,
            Err(status) => {
                logging::debug!(self.log, "unable to build request"; "status" => %status);
                self.tag.fail_op(status);
                return Step::Reschedule;
            }
        };

        let conn_id = self.connection.targ_conn_id();
        let conn_seq = self.connection.next_conn_seq();
        let frame = eip::build_unit_data(conn_id, conn_seq, &cip);
        let request = Request::new_connected(frame, conn_id, conn_seq);

        logging::debug!(self.log, "queueing request"; "op" => ?op, "conn_seq" => conn_seq);

        self.session.enqueue(request.clone());

        match op {
            Op::Read => self.tag.consume_read_trigger(),
            Op::Write => self.tag.consume_write_trigger(),
        }

        self.pending = Some(Pending { op, request });

        Step::Reschedule
    }

    fn build_cip(&self, op: Op) -> Result<Vec<u8>, Status> {
        let name = self.tag.attrs.get("name").ok_or(Status::BadParam)?;
        let ioi = cip::encode_tag_name(name)?;

        let elem_count = self.tag.attrs.get_int("elem_count", 1);
        if elem_count <= 0 || elem_count > i64::from(u16::MAX) {
            return Err(Status::BadParam);
        }

        let mut out = Vec::with_capacity(ioi.len() + 16);

        match op {
            Op::Read => {
                out.push(eip::SVC_READ_TAG_FRAG);
                out.extend_from_slice(&ioi);
                out.write_u16::<LittleEndian>(elem_count as u16).expect("vec write");
                out.write_u32::<LittleEndian>(0).expect("vec write"); // byte offset
            }
            Op::Write => {
                // Element type comes from a previous read; without it the
                // write cannot be framed.
                let type_info = self.type_info.ok_or(Status::BadData)?;
                let data = self.tag.data_snapshot();

                if data.is_empty() {
                    return Err(Status::BadData);
                }

                out.push(eip::SVC_WRITE_TAG_FRAG);
                out.extend_from_slice(&ioi);
                out.extend_from_slice(&type_info);
                out.write_u16::<LittleEndian>(elem_count as u16).expect("vec write");
                out.write_u32::<LittleEndian>(0).expect("vec write"); // byte offset
                out.extend_from_slice(&data);
            }
        }

        Ok(out)
    }

    fn poll_pending(&mut self) -> Step {
        let (op, request) = {
            let pending = self.pending.as_ref().expect("pending operation");
            (pending.op, pending.request.clone())
        };

        let status = request.status();
        if status.is_err() {
            self.session.remove_request(&request);
            self.pending = None;
            self.tag.fail_op(status);
            return Step::Reschedule;
        }

        if !request.resp_received() {
            return Step::Reschedule;
        }

        let frame = request.take_response();
        self.session.remove_request(&request);
        self.pending = None;

        match op {
            Op::Read => self.finish_read(&frame),
            Op::Write => self.finish_write(&frame),
        }

        Step::Reschedule
    }

    fn finish_read(&mut self, frame: &[u8]) {
        match self.unpack_reply(frame, eip::SVC_READ_TAG_FRAG) {
            Ok(data) => {
                if data.len() < 2 {
                    self.tag.fail_op(Status::BadData);
                    return;
                }

                self.type_info = Some([data[0], data[1]]);
                self.tag.store_read(&data[2..], time::timestamp_millis());

                logging::debug!(self.log, "read complete"; "size" => data.len() - 2);
            }
            Err(status) => {
                logging::debug!(self.log, "read failed"; "status" => %status);
                self.tag.fail_op(status);
            }
        }
    }

    fn finish_write(&mut self, frame: &[u8]) {
        match self.unpack_reply(frame, eip::SVC_WRITE_TAG_FRAG) {
            Ok(_) => {
                self.tag.mark_written(time::timestamp_millis());
                logging::debug!(self.log, "write complete");
            }
            Err(status) => {
                logging::debug!(self.log, "write failed"; "status" => %status);
                self.tag.fail_op(status);
            }
        }
    }

    /// Validate a connected reply frame down to its CIP payload:
    /// encapsulation command and status, then reply service, then general
    /// status.
    fn unpack_reply<'a>(&self, frame: &'a [u8], service: u8) -> Result<&'a [u8], Status> {
        let header = eip::EncapHeader::read(frame).ok_or(Status::BadData)?;

        if header.command != eip::CMD_SEND_UNIT_DATA {
            return Err(Status::BadData);
        }

        if header.status != 0 {
            return Err(Status::RemoteErr);
        }

        let reply = eip::parse_unit_data(frame).ok_or(Status::BadData)?;

        if reply.service != service | eip::SVC_REPLY_MASK {
            return Err(Status::BadData);
        }

        match reply.general_status {
            0x00 => Ok(reply.data),
            // Partial transfer; continuation at a byte offset is not
            // attempted.
            0x06 => Err(Status::BadData),
            _ => Err(Status::RemoteErr),
        }
    }

    /// Release the shared back-end resources and finish the tag, completing
    /// this tasklet.
    fn destroy(&mut self) -> Step {
        logging::debug!(self.log, "destroying tag back end");

        if let Some(pending) = self.pending.take() {
            pending.request.abort();
        }

        self.connection.dec_tag_count();
        self.session.dec_tag_count();
        self.tag.finish_destroy();

        Step::Done
    }
}
