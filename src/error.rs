// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Error taxonomy shared by every fallible operation in the control plane.

/// Outcome of a fallible control-plane operation.
///
/// There is no `Success` variant: operations that can fail return
/// `Result<T, ErrorCode>`, matching the rest of this crate's style.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// A null/absent context, an out-of-range argument, or an unrecognized
    /// wire value.
    InvalidParameter,
    /// The operation is forbidden in the automaton's current state (e.g.
    /// registering an interface after `start_device`).
    InvalidState,
    /// A fixed-capacity table (contexts, configurations, interfaces,
    /// endpoints) is exhausted.
    NoMemory,
    /// The process-wide context table has no free slot.
    NoMoreSlots,
    /// The hardware driver refused a subordinate operation.
    DriverError,
    /// A malformed setup packet or an unsupported standard request.
    ProtocolViolation,
}

pub type CtrlResult<T> = Result<T, ErrorCode>;
