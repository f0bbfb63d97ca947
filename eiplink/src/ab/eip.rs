//! EIP encapsulation codecs. Every frame starts with the 24-byte
//! little-endian encapsulation header; the payload framing differs between
//! unconnected (Send-RR-Data, NAI + UDI items) and connected
//! (Send-Unit-Data, CAI + CDI items) messaging. All serialization is
//! explicit field-by-field; nothing depends on in-memory struct layout.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

pub const ENCAP_HEADER_SIZE: usize = 24;

/// Upper bound on a single request or response frame.
pub const MAX_REQ_RESP_SIZE: usize = 600;

pub const DEFAULT_PORT: u16 = 44818;

/* encapsulation commands */
pub const CMD_REGISTER_SESSION: u16 = 0x0065;
pub const CMD_UNREGISTER_SESSION: u16 = 0x0066;
pub const CMD_SEND_RR_DATA: u16 = 0x006F;
pub const CMD_SEND_UNIT_DATA: u16 = 0x0070;

pub const EIP_VERSION: u16 = 0x0001;

/* CPF item types */
pub const ITEM_NAI: u16 = 0x0000;
pub const ITEM_CAI: u16 = 0x00A1;
pub const ITEM_CDI: u16 = 0x00B1;
pub const ITEM_UDI: u16 = 0x00B2;

/* CIP service codes */
pub const SVC_PCCC_EXECUTE: u8 = 0x4B;
pub const SVC_FORWARD_CLOSE: u8 = 0x4E;
pub const SVC_READ_TAG_FRAG: u8 = 0x52;
pub const SVC_WRITE_TAG_FRAG: u8 = 0x53;
pub const SVC_FORWARD_OPEN: u8 = 0x54;
pub const SVC_REPLY_MASK: u8 = 0x80;

/* Forward Open parameters */
pub const SECS_PER_TICK: u8 = 0x0A;
pub const TIMEOUT_TICKS: u8 = 0x05;
pub const VENDOR_ID: u16 = 0xF33D;
pub const VENDOR_SN: u32 = 0x21504345;
pub const TIMEOUT_MULTIPLIER: u8 = 0x01;
pub const RPI_MICROSECONDS: u32 = 1_000_000;
pub const PLC5_CONN_PARAMS: u16 = 0x4302;
pub const LGX_CONN_PARAMS: u16 = 0x43F8;
pub const TRANSPORT_CLASS_T3: u8 = 0xA3;

/* byte offsets within the encapsulation header */
const OFF_COMMAND: usize = 0;
const OFF_LENGTH: usize = 2;
const OFF_SESSION_HANDLE: usize = 4;
const OFF_STATUS: usize = 8;
const OFF_SENDER_CONTEXT: usize = 12;
const OFF_OPTIONS: usize = 20;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct EncapHeader {
    pub command: u16,
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: u64,
    pub options: u32,
}

impl EncapHeader {
    pub fn read(frame: &[u8]) -> Option<EncapHeader> {
        if frame.len() < ENCAP_HEADER_SIZE {
            return None;
        }

        Some(EncapHeader {
            command: LittleEndian::read_u16(&frame[OFF_COMMAND..]),
            length: LittleEndian::read_u16(&frame[OFF_LENGTH..]),
            session_handle: LittleEndian::read_u32(&frame[OFF_SESSION_HANDLE..]),
            status: LittleEndian::read_u32(&frame[OFF_STATUS..]),
            sender_context: LittleEndian::read_u64(&frame[OFF_SENDER_CONTEXT..]),
            options: LittleEndian::read_u32(&frame[OFF_OPTIONS..]),
        })
    }
}

/// Encapsulation command of a complete frame.
#[inline]
pub fn command(frame: &[u8]) -> u16 {
    LittleEndian::read_u16(&frame[OFF_COMMAND..])
}

/// Payload length promised by the header of a (possibly partial) frame.
/// Valid once the first 4 bytes have been received.
#[inline]
pub fn payload_len(frame: &[u8]) -> usize {
    LittleEndian::read_u16(&frame[OFF_LENGTH..]) as usize
}

/// Patch the session handle assigned by the peer into a built frame.
#[inline]
pub fn patch_session_handle(frame: &mut [u8], handle: u32) {
    LittleEndian::write_u32(&mut frame[OFF_SESSION_HANDLE..OFF_SESSION_HANDLE + 4], handle);
}

/// Patch the sender context (the session sequence id) into a built frame.
#[inline]
pub fn patch_sender_context(frame: &mut [u8], context: u64) {
    LittleEndian::write_u64(
        &mut frame[OFF_SENDER_CONTEXT..OFF_SENDER_CONTEXT + 8],
        context,
    );
}

fn write_header(out: &mut Vec<u8>, cmd: u16, payload_len: usize) {
    out.write_u16::<LittleEndian>(cmd).expect("vec write");
    out.write_u16::<LittleEndian>(payload_len as u16).expect("vec write");
    out.write_u32::<LittleEndian>(0).expect("vec write"); // session handle, patched at send
    out.write_u32::<LittleEndian>(0).expect("vec write"); // status
    out.write_u64::<LittleEndian>(0).expect("vec write"); // sender context, patched at send
    out.write_u32::<LittleEndian>(0).expect("vec write"); // options
}

/// RegisterSession request: header plus protocol version and option flags.
pub fn build_register_session() -> Vec<u8> {
    let mut out = Vec::with_capacity(ENCAP_HEADER_SIZE + 4);

    write_header(&mut out, CMD_REGISTER_SESSION, 4);
    out.write_u16::<LittleEndian>(EIP_VERSION).expect("vec write");
    out.write_u16::<LittleEndian>(0).expect("vec write");

    out
}

/// Unconnected request: Send-RR-Data carrying `cip` in the UDI item.
pub fn build_rr_data(cip: &[u8]) -> Vec<u8> {
    let payload_len = 4 + 2 + 2 + 4 + 4 + cip.len();
    let mut out = Vec::with_capacity(ENCAP_HEADER_SIZE + payload_len);

    write_header(&mut out, CMD_SEND_RR_DATA, payload_len);
    out.write_u32::<LittleEndian>(0).expect("vec write"); // interface handle
    out.write_u16::<LittleEndian>(1).expect("vec write"); // router timeout, seconds
    out.write_u16::<LittleEndian>(2).expect("vec write"); // item count
    out.write_u16::<LittleEndian>(ITEM_NAI).expect("vec write");
    out.write_u16::<LittleEndian>(0).expect("vec write");
    out.write_u16::<LittleEndian>(ITEM_UDI).expect("vec write");
    out.write_u16::<LittleEndian>(cip.len() as u16).expect("vec write");
    out.extend_from_slice(cip);

    out
}

/// Connected request: Send-Unit-Data addressing `conn_id` and carrying the
/// connection sequence number followed by `cip` in the CDI item.
pub fn build_unit_data(conn_id: u32, conn_seq: u16, cip: &[u8]) -> Vec<u8> {
    let cdi_len = 2 + cip.len();
    let payload_len = 4 + 2 + 2 + 8 + 4 + cdi_len;
    let mut out = Vec::with_capacity(ENCAP_HEADER_SIZE + payload_len);

    write_header(&mut out, CMD_SEND_UNIT_DATA, payload_len);
    out.write_u32::<LittleEndian>(0).expect("vec write"); // interface handle
    out.write_u16::<LittleEndian>(0).expect("vec write"); // router timeout, zero when connected
    out.write_u16::<LittleEndian>(2).expect("vec write"); // item count
    out.write_u16::<LittleEndian>(ITEM_CAI).expect("vec write");
    out.write_u16::<LittleEndian>(4).expect("vec write");
    out.write_u32::<LittleEndian>(conn_id).expect("vec write");
    out.write_u16::<LittleEndian>(ITEM_CDI).expect("vec write");
    out.write_u16::<LittleEndian>(cdi_len as u16).expect("vec write");
    out.write_u16::<LittleEndian>(conn_seq).expect("vec write");
    out.extend_from_slice(cip);

    out
}

pub struct ForwardOpenParams {
    /// Locally chosen originator connection id, sent target-to-originator.
    pub orig_conn_id: u32,
    /// Process-unique connection serial number.
    pub conn_serial: u16,
    /// Packet size and flags word for the target cpu family.
    pub conn_params: u16,
    /// Encoded connection path, word count first.
    pub path: Vec<u8>,
}

/// Forward Open request (service 0x54 to the Connection Manager), framed as
/// an unconnected Send-RR-Data.
pub fn build_forward_open(params: &ForwardOpenParams) -> Vec<u8> {
    let mut cip = Vec::with_capacity(36 + params.path.len());

    cip.push(SVC_FORWARD_OPEN);
    cip.push(2); // request path size in words
    cip.extend_from_slice(&[0x20, 0x06, 0x24, 0x01]); // Connection Manager, instance 1
    cip.push(SECS_PER_TICK);
    cip.push(TIMEOUT_TICKS);
    cip.write_u32::<LittleEndian>(0).expect("vec write"); // originator-to-target id, target assigns
    cip.write_u32::<LittleEndian>(params.orig_conn_id).expect("vec write");
    cip.write_u16::<LittleEndian>(params.conn_serial).expect("vec write");
    cip.write_u16::<LittleEndian>(VENDOR_ID).expect("vec write");
    cip.write_u32::<LittleEndian>(VENDOR_SN).expect("vec write");
    cip.push(TIMEOUT_MULTIPLIER);
    cip.extend_from_slice(&[0, 0, 0]); // reserved
    cip.write_u32::<LittleEndian>(RPI_MICROSECONDS).expect("vec write");
    cip.write_u16::<LittleEndian>(params.conn_params).expect("vec write");
    cip.write_u32::<LittleEndian>(RPI_MICROSECONDS).expect("vec write");
    cip.write_u16::<LittleEndian>(params.conn_params).expect("vec write");
    cip.push(TRANSPORT_CLASS_T3);
    cip.extend_from_slice(&params.path);

    build_rr_data(&cip)
}

/// Forward Close request (service 0x4E), one-shot teardown of a connection.
pub fn build_forward_close(conn_serial: u16, path: &[u8]) -> Vec<u8> {
    let mut cip = Vec::with_capacity(16 + path.len());

    cip.push(SVC_FORWARD_CLOSE);
    cip.push(2);
    cip.extend_from_slice(&[0x20, 0x06, 0x24, 0x01]);
    cip.push(SECS_PER_TICK);
    cip.push(TIMEOUT_TICKS);
    cip.write_u16::<LittleEndian>(conn_serial).expect("vec write");
    cip.write_u16::<LittleEndian>(VENDOR_ID).expect("vec write");
    cip.write_u32::<LittleEndian>(VENDOR_SN).expect("vec write");
    // connection path, size byte then reserved pad then the route bytes
    cip.push(path[0]);
    cip.push(0);
    cip.extend_from_slice(&path[1..]);

    build_rr_data(&cip)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ForwardOpenReply {
    pub service: u8,
    pub general_status: u8,
    /// Target-assigned id carried in originator-to-target position; all
    /// subsequent connected requests address it.
    pub conn_id: u32,
}

/// Parse a Forward Open reply out of a complete Send-RR-Data frame.
pub fn parse_forward_open_reply(frame: &[u8]) -> Option<ForwardOpenReply> {
    let data = unconnected_data(frame)?;

    if data.len() < 8 {
        return None;
    }

    Some(ForwardOpenReply {
        service: data[0],
        general_status: data[2],
        conn_id: LittleEndian::read_u32(&data[4..]),
    })
}

#[derive(Debug, Eq, PartialEq)]
pub struct ConnectedReply<'a> {
    pub conn_id: u32,
    pub conn_seq: u16,
    pub service: u8,
    pub general_status: u8,
    /// Reply payload after the CIP status words.
    pub data: &'a [u8],
}

/// Parse a complete Send-Unit-Data frame into its connected reply parts.
pub fn parse_unit_data(frame: &[u8]) -> Option<ConnectedReply> {
    let (conn_id, cdi) = connected_items(frame)?;

    if cdi.len() < 6 {
        return None;
    }

    let conn_seq = LittleEndian::read_u16(cdi);
    let service = cdi[2];
    let general_status = cdi[4];
    let status_words = cdi[5] as usize;
    let data_at = 6 + status_words * 2;

    if cdi.len() < data_at {
        return None;
    }

    Some(ConnectedReply {
        conn_id,
        conn_seq,
        service,
        general_status,
        data: &cdi[data_at..],
    })
}

/// Demux key of a connected reply: the connection id and sequence number.
#[inline]
pub fn connected_keys(frame: &[u8]) -> Option<(u32, u16)> {
    let (conn_id, cdi) = connected_items(frame)?;

    if cdi.len() < 2 {
        return None;
    }

    Some((conn_id, LittleEndian::read_u16(cdi)))
}

/// Walk the CPF items of an unconnected frame and return the UDI payload.
fn unconnected_data(frame: &[u8]) -> Option<&[u8]> {
    let mut items = CpfItems::new(frame)?;

    while let Some((item_type, data)) = items.next() {
        if item_type == ITEM_UDI {
            return Some(data);
        }
    }

    None
}

/// Walk the CPF items of a connected frame and return the connection id
/// from the CAI item along with the CDI payload.
fn connected_items(frame: &[u8]) -> Option<(u32, &[u8])> {
    let mut conn_id = None;
    let mut cdi = None;
    let mut items = CpfItems::new(frame)?;

    while let Some((item_type, data)) = items.next() {
        match item_type {
            ITEM_CAI if data.len() >= 4 => conn_id = Some(LittleEndian::read_u32(data)),
            ITEM_CDI => cdi = Some(data),
            _ => {}
        }
    }

    Some((conn_id?, cdi?))
}

/// Cursor over the Common Packet Format items that follow the interface
/// handle and router timeout of a Send-RR-Data or Send-Unit-Data payload.
struct CpfItems<'a> {
    buf: &'a [u8],
    at: usize,
    remaining: usize,
}

impl<'a> CpfItems<'a> {
    fn new(frame: &'a [u8]) -> Option<CpfItems<'a>> {
        // header + interface handle + router timeout + item count
        if frame.len() < ENCAP_HEADER_SIZE + 8 {
            return None;
        }

        let count = LittleEndian::read_u16(&frame[ENCAP_HEADER_SIZE + 6..]) as usize;

        Some(CpfItems {
            buf: frame,
            at: ENCAP_HEADER_SIZE + 8,
            remaining: count,
        })
    }

    fn next(&mut self) -> Option<(u16, &'a [u8])> {
        if self.remaining == 0 || self.at + 4 > self.buf.len() {
            return None;
        }

        let item_type = LittleEndian::read_u16(&self.buf[self.at..]);
        let len = LittleEndian::read_u16(&self.buf[self.at + 2..]) as usize;
        let data_at = self.at + 4;

        if data_at + len > self.buf.len() {
            return None;
        }

        self.at = data_at + len;
        self.remaining -= 1;

        // The last item's data runs to the end of the frame when its length
        // field undercounts (CDI replies carry the CIP reply after the
        // declared item bytes on some targets).
        let data = if self.remaining == 0 {
            &self.buf[data_at..]
        } else {
            &self.buf[data_at..data_at + len]
        };

        Some((item_type, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_session_layout() {
        let frame = build_register_session();

        assert_eq!(frame.len(), 28);
        assert_eq!(command(&frame), CMD_REGISTER_SESSION);
        assert_eq!(payload_len(&frame), 4);
        // version 1, option flags 0
        assert_eq!(&frame[24..], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut frame = build_register_session();
        patch_session_handle(&mut frame, 0xCAFEF00D);
        patch_sender_context(&mut frame, 0x0102030405060708);

        let header = EncapHeader::read(&frame).unwrap();

        assert_eq!(header.command, CMD_REGISTER_SESSION);
        assert_eq!(header.length, 4);
        assert_eq!(header.session_handle, 0xCAFEF00D);
        assert_eq!(header.status, 0);
        assert_eq!(header.sender_context, 0x0102030405060708);
        assert_eq!(header.options, 0);
    }

    #[test]
    fn test_rr_data_framing() {
        let cip = [0xAA, 0xBB, 0xCC];
        let frame = build_rr_data(&cip);

        assert_eq!(command(&frame), CMD_SEND_RR_DATA);
        assert_eq!(payload_len(&frame), frame.len() - ENCAP_HEADER_SIZE);
        // interface handle 0, router timeout 1
        assert_eq!(&frame[24..28], &[0, 0, 0, 0]);
        assert_eq!(&frame[28..30], &[1, 0]);
        // two items: NAI empty, then UDI with the CIP bytes
        assert_eq!(&frame[30..32], &[2, 0]);
        assert_eq!(unconnected_data(&frame).unwrap(), &cip);
    }

    #[test]
    fn test_unit_data_roundtrip() {
        let cip = [0x52, 0x01, 0x02];
        let frame = build_unit_data(0xDEADBEEF, 0x1234, &cip);

        assert_eq!(command(&frame), CMD_SEND_UNIT_DATA);
        assert_eq!(payload_len(&frame), frame.len() - ENCAP_HEADER_SIZE);
        assert_eq!(connected_keys(&frame), Some((0xDEADBEEF, 0x1234)));
    }

    #[test]
    fn test_parse_connected_reply() {
        // Reply: seq, service 0xD2, reserved, status 0, no status words,
        // then payload.
        let mut cip_reply = Vec::new();
        cip_reply.push(0xD2);
        cip_reply.push(0x00);
        cip_reply.push(0x00);
        cip_reply.push(0x00);
        cip_reply.extend_from_slice(&[0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00]);

        let frame = build_unit_data(0xDEADBEEF, 7, &cip_reply);
        let reply = parse_unit_data(&frame).unwrap();

        assert_eq!(reply.conn_id, 0xDEADBEEF);
        assert_eq!(reply.conn_seq, 7);
        assert_eq!(reply.service, 0xD2);
        assert_eq!(reply.general_status, 0);
        assert_eq!(reply.data, &[0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_connected_reply_skips_status_words() {
        let mut cip_reply = Vec::new();
        cip_reply.push(0xD2);
        cip_reply.push(0x00);
        cip_reply.push(0xFF); // general status
        cip_reply.push(0x02); // two extra status words
        cip_reply.extend_from_slice(&[0x11, 0x11, 0x22, 0x22]);
        cip_reply.extend_from_slice(&[0x99]);

        let frame = build_unit_data(1, 1, &cip_reply);
        let reply = parse_unit_data(&frame).unwrap();

        assert_eq!(reply.general_status, 0xFF);
        assert_eq!(reply.data, &[0x99]);
    }

    #[test]
    fn test_forward_open_roundtrip() {
        let params = ForwardOpenParams {
            orig_conn_id: 42,
            conn_serial: 0x0101,
            conn_params: LGX_CONN_PARAMS,
            path: vec![0x03, 0x01, 0x00, 0x20, 0x02, 0x24, 0x01],
        };
        let frame = build_forward_open(&params);

        assert_eq!(command(&frame), CMD_SEND_RR_DATA);

        let cip = unconnected_data(&frame).unwrap();

        assert_eq!(cip[0], SVC_FORWARD_OPEN);
        assert_eq!(&cip[2..6], &[0x20, 0x06, 0x24, 0x01]);
        // originator-to-target id is zero, target-to-originator carries ours
        assert_eq!(LittleEndian::read_u32(&cip[8..]), 0);
        assert_eq!(LittleEndian::read_u32(&cip[12..]), 42);
        assert_eq!(LittleEndian::read_u16(&cip[16..]), 0x0101);
        assert_eq!(LittleEndian::read_u16(&cip[18..]), VENDOR_ID);
        assert_eq!(LittleEndian::read_u32(&cip[20..]), VENDOR_SN);
        // path is appended verbatim, word count first
        assert_eq!(&cip[cip.len() - 7..], &params.path[..]);
    }

    #[test]
    fn test_parse_forward_open_reply() {
        let mut cip = Vec::new();
        cip.push(SVC_FORWARD_OPEN | SVC_REPLY_MASK); // 0xD4
        cip.push(0x00);
        cip.push(0x00); // general status ok
        cip.push(0x00);
        cip.write_u32::<LittleEndian>(0xDEADBEEF).unwrap(); // assigned id
        cip.write_u32::<LittleEndian>(42).unwrap(); // ours, echoed
        cip.write_u16::<LittleEndian>(0x0101).unwrap();
        cip.write_u16::<LittleEndian>(VENDOR_ID).unwrap();
        cip.write_u32::<LittleEndian>(VENDOR_SN).unwrap();

        let frame = build_rr_data(&cip);
        let reply = parse_forward_open_reply(&frame).unwrap();

        assert_eq!(reply.service, 0xD4);
        assert_eq!(reply.general_status, 0);
        assert_eq!(reply.conn_id, 0xDEADBEEF);
    }

    #[test]
    fn test_forward_close_layout() {
        let path = vec![0x03, 0x01, 0x00, 0x20, 0x02, 0x24, 0x01];
        let frame = build_forward_close(0xBEEF, &path);
        let cip = unconnected_data(&frame).unwrap();

        assert_eq!(cip[0], SVC_FORWARD_CLOSE);
        assert_eq!(LittleEndian::read_u16(&cip[8..]), 0xBEEF);
        // size byte, reserved pad, then the route bytes
        assert_eq!(cip[16], 0x03);
        assert_eq!(cip[17], 0x00);
        assert_eq!(&cip[18..], &path[1..]);
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(EncapHeader::read(&[0u8; 10]).is_none());
        assert!(parse_unit_data(&[0u8; 30]).is_none());
    }
}
