//! The portable request engine: pipelines a batch of requests across
//! whatever submit/poll primitives the backend exposes, classifies each
//! completion, and aborts the whole batch on the first non-success
//! response.

use std::time::Duration;

use firewire_forensics_shared::{Direction, Request, ResultCode};

use crate::backend::{CompletionStatus, PlatformDevice};

/// Per-completion wait before a batch is declared dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(150);

/// Why a batch aborted. Maps 1:1 onto the negative [`ResultCode`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    Busy,
    BusReset,
    IoError,
    IoSize,
    IoTimeout,
}

impl From<BatchError> for ResultCode {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Busy => ResultCode::Busy,
            BatchError::BusReset => ResultCode::BusReset,
            BatchError::IoError => ResultCode::IoError,
            BatchError::IoSize => ResultCode::IoSize,
            BatchError::IoTimeout => ResultCode::IoTimeout,
        }
    }
}

/// Run one logical batch to completion or abort. Submits in
/// caller-supplied order, greedily, while `in_flight < depth`; after
/// each submission round waits for exactly one completion before
/// submitting more. On abort, pending commands are cancelled at the
/// backend before returning.
pub(crate) fn run_batch(
    platform: &mut dyn PlatformDevice,
    direction: Direction,
    requests: &mut [Request],
    timeout: Duration,
) -> Result<(), BatchError> {
    let max_req = platform.max_req();
    for req in requests.iter() {
        if req.len() as u32 > max_req {
            return Err(BatchError::IoSize);
        }
    }

    let total = requests.len();
    if total == 0 {
        return Ok(());
    }

    let depth = platform.pipeline_depth(direction).max(1);
    let mut next_to_submit = 0usize;
    let mut in_flight = 0usize;
    let mut retired = 0usize;

    let outcome = 'batch: loop {
        while in_flight < depth && next_to_submit < total {
            let idx = next_to_submit;
            let (address, len, write_payload) = {
                let req = &requests[idx];
                let payload = match direction {
                    Direction::Write => Some(&*req.buffer),
                    Direction::Read => None,
                };
                (req.address, req.len(), payload)
            };
            if let Err(_platform_err) = platform.submit(idx, direction, address, len, write_payload) {
                break 'batch outcome_abort(platform, BatchError::IoError);
            }
            next_to_submit += 1;
            in_flight += 1;
        }

        if retired == total {
            break 'batch Ok(());
        }

        match platform.poll_completion(timeout) {
            None => break 'batch outcome_abort(platform, BatchError::IoTimeout),
            Some(completion) => match completion.status {
                CompletionStatus::Complete(payload) => {
                    if direction == Direction::Read {
                        let req = &mut requests[completion.closure];
                        if payload.len() != req.len() {
                            break 'batch outcome_abort(platform, BatchError::IoError);
                        }
                        req.buffer.copy_from_slice(&payload);
                    }
                    in_flight -= 1;
                    retired += 1;
                }
                CompletionStatus::Busy => break 'batch outcome_abort(platform, BatchError::Busy),
                CompletionStatus::GenerationMismatch => {
                    break 'batch outcome_abort(platform, BatchError::BusReset)
                }
                CompletionStatus::Other => break 'batch outcome_abort(platform, BatchError::IoError),
            },
        }
    };

    outcome
}

fn outcome_abort(platform: &mut dyn PlatformDevice, err: BatchError) -> Result<(), BatchError> {
    match err {
        BatchError::BusReset => {
            log::warn!("batch aborted: bus reset changed the generation mid-transaction")
        }
        BatchError::Busy | BatchError::IoTimeout => {
            log::debug!("batch aborted, retry may succeed: {err:?}")
        }
        BatchError::IoError | BatchError::IoSize => log::debug!("batch aborted: {err:?}"),
    }
    platform.cancel_pending();
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Completion;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct MockDevice {
        depth: usize,
        max_req: u32,
        scripted: VecDeque<CompletionStatus>,
        cancelled: bool,
        submissions: Vec<(usize, Direction, u64, usize)>,
        completed_count: usize,
    }

    impl PlatformDevice for MockDevice {
        fn node_id(&self) -> u16 {
            0xffc0
        }
        fn generation(&self) -> u32 {
            1
        }
        fn csr(&self) -> &[u32; firewire_forensics_shared::ROM_QUADLETS] {
            unimplemented!("not needed for engine tests")
        }
        fn is_open(&self) -> bool {
            true
        }
        fn open(&mut self) -> Result<(), Box<dyn crate::backend::PlatformError>> {
            Ok(())
        }
        fn close(&mut self) {}
        fn max_req(&self) -> u32 {
            self.max_req
        }
        fn pipeline_depth(&self, _direction: Direction) -> usize {
            self.depth
        }
        fn submit(
            &mut self,
            closure: usize,
            direction: Direction,
            address: u64,
            len: usize,
            _write_payload: Option<&[u8]>,
        ) -> Result<(), Box<dyn crate::backend::PlatformError>> {
            self.submissions.push((closure, direction, address, len));
            Ok(())
        }
        fn poll_completion(&mut self, _timeout: Duration) -> Option<Completion> {
            let status = self.scripted.pop_front()?;
            // Depth-1 backend: completions retire in submission order.
            let closure = self.completed_count;
            self.completed_count += 1;
            Some(Completion { closure, status })
        }
        fn cancel_pending(&mut self) {
            self.cancelled = true;
        }
    }

    #[test]
    fn quadlet_length_selects_four_byte_requests() {
        let mut buf = [0u8; 4];
        let req = Request::new(0x1000, &mut buf);
        assert!(req.is_quadlet());
        let mut buf8 = [0u8; 8];
        let req8 = Request::new(0x1000, &mut buf8);
        assert!(!req8.is_quadlet());
    }

    #[test]
    fn oversized_request_is_rejected_before_submission() {
        let mut platform = MockDevice {
            depth: 1,
            max_req: 512,
            ..Default::default()
        };
        let mut buf = [0u8; 1024];
        let mut requests = [Request::new(0, &mut buf)];
        let err = run_batch(&mut platform, Direction::Read, &mut requests, DEFAULT_TIMEOUT).unwrap_err();
        assert_eq!(err, BatchError::IoSize);
        assert!(platform.submissions.is_empty());
    }

    #[test]
    fn generation_mismatch_aborts_batch_and_cancels_pipeline() {
        let mut platform = MockDevice {
            depth: 1,
            max_req: 512,
            scripted: VecDeque::from(vec![
                CompletionStatus::Complete(vec![1, 2, 3, 4]),
                CompletionStatus::GenerationMismatch,
            ]),
            ..Default::default()
        };
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut c = [0u8; 4];
        let mut requests = [
            Request::new(0x10, &mut a),
            Request::new(0x20, &mut b),
            Request::new(0x30, &mut c),
        ];
        let err = run_batch(&mut platform, Direction::Read, &mut requests, DEFAULT_TIMEOUT).unwrap_err();
        assert_eq!(err, BatchError::BusReset);
        assert!(platform.cancelled);
        assert_eq!(a, [1, 2, 3, 4]);
        assert_eq!(b, [0, 0, 0, 0]);
    }

    #[test]
    fn timeout_with_no_completion_is_batch_fatal() {
        let mut platform = MockDevice {
            depth: 1,
            max_req: 512,
            ..Default::default()
        };
        let mut buf = [0u8; 4];
        let mut requests = [Request::new(0, &mut buf)];
        let err = run_batch(&mut platform, Direction::Read, &mut requests, Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(err, BatchError::IoTimeout);
        assert!(platform.cancelled);
    }

    #[test]
    fn read_payload_length_mismatch_is_fatal() {
        let mut platform = MockDevice {
            depth: 1,
            max_req: 512,
            scripted: VecDeque::from(vec![CompletionStatus::Complete(vec![1, 2, 3])]),
            ..Default::default()
        };
        let mut buf = [0u8; 4];
        let mut requests = [Request::new(0, &mut buf)];
        let err = run_batch(&mut platform, Direction::Read, &mut requests, DEFAULT_TIMEOUT).unwrap_err();
        assert_eq!(err, BatchError::IoError);
    }
}
