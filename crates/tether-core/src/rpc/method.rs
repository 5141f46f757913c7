//! Per-call method interface handed to every handler.
//!
//! # Lifecycle of a call (for beginners)
//!
//! A handler talks to the wire only through a [`MethodInterface`], and only in
//! this order:
//!
//! ```text
//! get_parameter / get_parameter_buffer   (zero or more, declared order)
//! finish_input_parameters                (exactly once)
//! reserve_result_buffer(0, ..), (1, ..)  (zero or more, slot order)
//! resize_last_result_buffer              (optional, shrink only)
//! finish_good(status) | finish_internal_error()
//! ```
//!
//! Whatever happens, the call ends in exactly one [`CallOutcome`].  A
//! malformed parameter stream ends it as a protocol error, an exhausted
//! transmit budget ends it as [`CallOutcome::Aborted`], and a handler that
//! simply returns without finishing is turned into an internal error by
//! [`MethodInterface::into_outcome`].
//!
//! Calling the operations out of order is a handler bug.  Debug builds panic
//! on it; release builds end the call as an internal error.

use tracing::{error, warn};

use crate::protocol::codec::{encode_reply, ParamReader, ProtocolError, WireScalar};
use crate::protocol::messages::{ReplyOutcome, RESULT_BUFFER_PREFIX_SIZE};
use crate::rpc::status::StatusCode;

/// Terminal result of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call executed.  `buffers` are trimmed to their reported lengths.
    Success {
        status: StatusCode,
        buffers: Vec<Vec<u8>>,
    },
    /// The request was malformed or named an unknown method.
    ProtocolError(ProtocolError),
    /// The handler refused the call or misused the interface.
    InternalError,
    /// A result buffer did not fit the transmit budget.
    Aborted,
}

impl CallOutcome {
    /// Wire outcome code for this result.
    pub fn reply_outcome(&self) -> ReplyOutcome {
        match self {
            CallOutcome::Success { .. } => ReplyOutcome::Success,
            CallOutcome::ProtocolError(_) => ReplyOutcome::ProtocolError,
            CallOutcome::InternalError => ReplyOutcome::InternalError,
            CallOutcome::Aborted => ReplyOutcome::TransmitBudgetExceeded,
        }
    }

    /// Encodes the reply frame for `request_id`.
    ///
    /// Only a success carries a status and buffers.
    pub fn encode(&self, request_id: u32) -> Vec<u8> {
        match self {
            CallOutcome::Success { status, buffers } => {
                let slices: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();
                encode_reply(request_id, ReplyOutcome::Success, status.0, &slices)
            }
            other => encode_reply(request_id, other.reply_outcome(), 0, &[]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Parameters,
    Results,
    Finished,
}

#[derive(Debug)]
struct ResultBuffer {
    data: Vec<u8>,
    len: usize,
}

/// Per-call context bound to one request body and one transmit budget.
#[derive(Debug)]
pub struct MethodInterface<'a> {
    request_id: u32,
    method: &'a str,
    params: ParamReader<'a>,
    phase: Phase,
    budget_remaining: usize,
    buffers: Vec<ResultBuffer>,
    outcome: Option<CallOutcome>,
}

impl<'a> MethodInterface<'a> {
    /// Binds a new interface to a request body declaring `param_count`
    /// parameters.  `tx_budget` bounds the total reply body, counting each
    /// buffer's 4-byte length prefix.
    pub fn new(
        request_id: u32,
        method: &'a str,
        body: &'a [u8],
        param_count: u32,
        tx_budget: usize,
    ) -> Self {
        Self {
            request_id,
            method,
            params: ParamReader::new(body, param_count),
            phase: Phase::Parameters,
            budget_remaining: tx_budget,
            buffers: Vec::new(),
            outcome: None,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn method_name(&self) -> &'a str {
        self.method
    }

    /// Reply bytes still available for result buffers.
    pub fn remaining_budget(&self) -> usize {
        self.budget_remaining
    }

    /// Returns `true` once the call has a terminal outcome.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    // ── Parameter phase ───────────────────────────────────────────────────────

    /// Reads the next parameter as a scalar of type `T`.
    ///
    /// Returns `None` and ends the call as a protocol error if the parameter
    /// stream is exhausted or the next parameter has another type.  After a
    /// failure, further reads keep returning `None`.
    pub fn get_parameter<T: WireScalar>(&mut self) -> Option<T> {
        if !self.expect_parameter_phase("get_parameter") {
            return None;
        }
        let result = self.params.read_scalar::<T>();
        self.accept_parameter(result)
    }

    /// Reads the next parameter as a buffer.  The returned slice borrows the
    /// request body; nothing is copied.
    pub fn get_parameter_buffer(&mut self) -> Option<&'a [u8]> {
        if !self.expect_parameter_phase("get_parameter_buffer") {
            return None;
        }
        let result = self.params.read_buffer();
        self.accept_parameter(result)
    }

    /// Closes the parameter phase.
    ///
    /// Returns `false` and ends the call as a protocol error if declared
    /// parameters were left unread or bytes trail the last one.
    pub fn finish_input_parameters(&mut self) -> bool {
        if !self.expect_parameter_phase("finish_input_parameters") {
            return false;
        }
        match self.params.finish() {
            Ok(()) => {
                self.phase = Phase::Results;
                true
            }
            Err(e) => {
                self.finish_protocol_error(e);
                false
            }
        }
    }

    // ── Result phase ──────────────────────────────────────────────────────────

    /// Reserves result buffer `slot` with `size` bytes of zeroed capacity.
    ///
    /// Slots must be reserved in order 0, 1, 2, …  Returns `None` if the
    /// reservation would overrun the transmit budget; the call is then
    /// [`CallOutcome::Aborted`] and the handler must return without
    /// finishing.
    pub fn reserve_result_buffer(&mut self, slot: usize, size: usize) -> Option<&mut [u8]> {
        match self.phase {
            Phase::Results => {}
            Phase::Parameters => {
                self.misuse("reserve_result_buffer before finish_input_parameters");
                return None;
            }
            Phase::Finished => {
                self.after_finish("reserve_result_buffer");
                return None;
            }
        }

        debug_assert_eq!(
            slot,
            self.buffers.len(),
            "result buffers must be reserved in slot order"
        );
        if slot != self.buffers.len() {
            self.misuse("result buffer reserved out of slot order");
            return None;
        }

        let cost = size.saturating_add(RESULT_BUFFER_PREFIX_SIZE);
        if cost > self.budget_remaining {
            warn!(
                method = self.method,
                request_id = self.request_id,
                slot,
                size,
                remaining = self.budget_remaining,
                "result buffer exceeds transmit budget; aborting call"
            );
            self.finish_with(CallOutcome::Aborted);
            return None;
        }
        self.budget_remaining -= cost;

        self.buffers.push(ResultBuffer {
            data: vec![0u8; size],
            len: size,
        });
        self.buffers.last_mut().map(|b| b.data.as_mut_slice())
    }

    /// Shrinks the reported length of the most recently reserved buffer.
    ///
    /// A `new_size` larger than the buffer's capacity is clamped to the
    /// capacity; buffers never grow.
    pub fn resize_last_result_buffer(&mut self, new_size: usize) {
        match self.phase {
            Phase::Results => {}
            Phase::Parameters => {
                self.misuse("resize_last_result_buffer before finish_input_parameters");
                return;
            }
            Phase::Finished => {
                self.after_finish("resize_last_result_buffer");
                return;
            }
        }
        let Some(last) = self.buffers.last_mut() else {
            self.misuse("resize_last_result_buffer with no reserved buffer");
            return;
        };
        let capacity = last.data.len();
        debug_assert!(
            new_size <= capacity,
            "result buffer cannot grow: {new_size} > capacity {capacity}"
        );
        let new_len = new_size.min(capacity);
        // Bytes given back by a shrink can be spent on later slots.
        self.budget_remaining += last.len.saturating_sub(new_len);
        last.len = new_len;
    }

    // ── Terminal operations ───────────────────────────────────────────────────

    /// Ends the call successfully with a domain `status`.
    pub fn finish_good(&mut self, status: StatusCode) {
        match self.phase {
            Phase::Results => {
                let buffers = std::mem::take(&mut self.buffers)
                    .into_iter()
                    .map(|mut b| {
                        b.data.truncate(b.len);
                        b.data
                    })
                    .collect();
                self.finish_with(CallOutcome::Success { status, buffers });
            }
            Phase::Parameters => self.misuse("finish_good before finish_input_parameters"),
            Phase::Finished => self.after_finish("finish_good"),
        }
    }

    /// Ends the call as an internal error.  Legal in either phase.
    pub fn finish_internal_error(&mut self) {
        if self.phase == Phase::Finished {
            self.after_finish("finish_internal_error");
            return;
        }
        self.finish_with(CallOutcome::InternalError);
    }

    /// Consumes the interface and yields the call's terminal outcome.
    ///
    /// A handler that returned without a terminal call yields
    /// [`CallOutcome::InternalError`].
    pub fn into_outcome(self) -> CallOutcome {
        match self.outcome {
            Some(outcome) => outcome,
            None => {
                error!(
                    method = self.method,
                    request_id = self.request_id,
                    "handler returned without finishing the call"
                );
                CallOutcome::InternalError
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn expect_parameter_phase(&mut self, op: &str) -> bool {
        match self.phase {
            Phase::Parameters => true,
            // Reads after a failed read are expected from handlers that
            // collect every parameter before checking them.
            Phase::Finished => false,
            Phase::Results => {
                self.misuse(op);
                false
            }
        }
    }

    fn accept_parameter<T>(&mut self, result: Result<T, ProtocolError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.finish_protocol_error(e);
                None
            }
        }
    }

    fn finish_protocol_error(&mut self, e: ProtocolError) {
        warn!(
            method = self.method,
            request_id = self.request_id,
            error = %e,
            "malformed request parameters"
        );
        self.finish_with(CallOutcome::ProtocolError(e));
    }

    fn finish_with(&mut self, outcome: CallOutcome) {
        self.buffers.clear();
        self.phase = Phase::Finished;
        self.outcome = Some(outcome);
    }

    fn misuse(&mut self, what: &str) {
        debug_assert!(self.phase == Phase::Finished, "method interface misuse: {what}");
        error!(
            method = self.method,
            request_id = self.request_id,
            "method interface misuse: {what}"
        );
        if self.phase != Phase::Finished {
            self.finish_with(CallOutcome::InternalError);
        }
    }

    fn after_finish(&self, op: &str) {
        debug_assert!(
            self.phase != Phase::Finished,
            "{op} called after the call already finished"
        );
        warn!(
            method = self.method,
            request_id = self.request_id,
            "{op} ignored: call already finished"
        );
    }
}
