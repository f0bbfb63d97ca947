use crate::status::Status;
use std::sync::{Arc, Mutex};

/// One EIP packet in flight. The buffer holds the request bytes while
/// sending and is overwritten with the response frame once one is matched.
/// Shared between the owning tag or connection tasklet and the session
/// tasklet; all fields live behind the one lock.
pub struct Request {
    state: Mutex<RequestState>,
}

pub struct RequestState {
    pub data: Vec<u8>,
    /// Send progress into `data`; a partial write resumes here.
    pub offset: usize,
    pub send_request: bool,
    pub send_in_progress: bool,
    pub recv_in_progress: bool,
    pub resp_received: bool,
    pub abort_request: bool,
    /// One-shot requests (RegisterSession, Forward Close) are aborted as
    /// soon as the last byte leaves, freeing the queue slot.
    pub abort_after_send: bool,
    /// Demux key for unconnected requests, assigned at first transmission.
    pub session_seq_id: u64,
    /// Demux key for connected requests, assigned when the request is built.
    pub conn_id: u32,
    pub conn_seq: u16,
    pub status: Status,
}

impl Request {
    /// A request ready to be queued; `data` is the complete frame with the
    /// session handle and sender context left for the session to patch.
    pub fn new(data: Vec<u8>) -> Arc<Request> {
        Arc::new(Request {
            state: Mutex::new(RequestState {
                data,
                offset: 0,
                send_request: true,
                send_in_progress: false,
                recv_in_progress: false,
                resp_received: false,
                abort_request: false,
                abort_after_send: false,
                session_seq_id: 0,
                conn_id: 0,
                conn_seq: 0,
                status: Status::Pending,
            }),
        })
    }

    /// One-shot variant: aborted right after the send completes.
    pub fn new_one_shot(data: Vec<u8>) -> Arc<Request> {
        let request = Request::new(data);
        request.lock().abort_after_send = true;
        request
    }

    /// Connected variant carrying its (connection id, sequence) demux key.
    pub fn new_connected(data: Vec<u8>, conn_id: u32, conn_seq: u16) -> Arc<Request> {
        let request = Request::new(data);
        {
            let mut state = request.lock();
            state.conn_id = conn_id;
            state.conn_seq = conn_seq;
        }
        request
    }

    #[inline]
    pub fn lock(&self) -> std::sync::MutexGuard<RequestState> {
        self.state.lock().expect("Request lock poisoned")
    }

    #[inline]
    pub fn resp_received(&self) -> bool {
        self.lock().resp_received
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Flag the request for removal from the session queue. Honored by the
    /// session on its next pass, unless the request is mid-transmission.
    #[inline]
    pub fn abort(&self) {
        self.lock().abort_request = true;
    }

    /// Take the response frame out of a completed request.
    pub fn take_response(&self) -> Vec<u8> {
        let mut state = self.lock();
        state.resp_received = false;
        std::mem::replace(&mut state.data, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_sendable() {
        let request = Request::new(vec![1, 2, 3]);
        let state = request.lock();

        assert!(state.send_request);
        assert!(!state.send_in_progress);
        assert!(!state.resp_received);
        assert_eq!(state.status, Status::Pending);
    }

    #[test]
    fn test_one_shot_flag() {
        let request = Request::new_one_shot(vec![]);

        assert!(request.lock().abort_after_send);
    }

    #[test]
    fn test_connected_keys_recorded() {
        let request = Request::new_connected(vec![], 0xDEADBEEF, 99);
        let state = request.lock();

        assert_eq!(state.conn_id, 0xDEADBEEF);
        assert_eq!(state.conn_seq, 99);
    }

    #[test]
    fn test_take_response_clears_flag() {
        let request = Request::new(vec![]);
        {
            let mut state = request.lock();
            state.data = vec![9, 9];
            state.resp_received = true;
        }

        assert_eq!(request.take_response(), vec![9, 9]);
        assert!(!request.resp_received());
    }
}
