// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! External contracts: the hardware-independent layer (HIL) this core
//! consumes below it, and the contracts it exposes above it to upper-layer
//! classes and application firmware.
//!
//! `configuration_set`/`reset_received` are bound through [`DeviceHooks`]'s
//! generic parameter on [`crate::context::DeviceContext`], fixed once at
//! construction and monomorphized at compile time -- the source library
//! resolves the equivalent two hooks through link-time symbol resolution
//! specifically to deny a runtime write-primitive over the callback; a
//! trait bound fixed at a single generic instantiation site gets the same
//! property without `extern "C"` linkage games. Per-interface setup and
//! endpoint callbacks are different: the source stores those as a function
//! pointer *per interface* (multiple interfaces legitimately need distinct
//! handlers), so [`ClassInterface`] is a trait object reference instead,
//! the direct analogue of that per-interface handler field.

use crate::error::ErrorCode;
use crate::interface::{EndpointDirection, EndpointType};
use crate::setup::SetupPacket;

/// The downward contract: FIFO reads/writes, endpoint enable/disable,
/// address programming, stall, ZLP emission, IRQ delivery all live behind
/// this trait. The core never touches hardware registers directly.
pub trait UsbHardware {
    /// Asks the driver for a device id for a newly declared context.
    fn declare_device(&self) -> Result<u32, ErrorCode>;
    fn release_device(&self, dev_id: u32) -> Result<(), ErrorCode>;

    fn map(&self, dev_id: u32) -> Result<(), ErrorCode>;
    fn unmap(&self, dev_id: u32) -> Result<(), ErrorCode>;

    /// Enables the hardware IP; the automaton moves `Attached -> Powered`
    /// on the first bus activity the driver reports afterwards.
    fn enable_device(&self, dev_id: u32) -> Result<(), ErrorCode>;

    fn configure_endpoint(
        &self,
        dev_id: u32,
        number: u8,
        ep_type: EndpointType,
        direction: EndpointDirection,
        max_packet_size: u16,
    ) -> Result<(), ErrorCode>;
    fn enable_endpoint(&self, dev_id: u32, number: u8) -> Result<(), ErrorCode>;
    fn disable_endpoint(&self, dev_id: u32, number: u8) -> Result<(), ErrorCode>;

    fn stall_endpoint(&self, dev_id: u32, number: u8) -> Result<(), ErrorCode>;
    fn clear_stall_endpoint(&self, dev_id: u32, number: u8) -> Result<(), ErrorCode>;
    fn is_endpoint_stalled(&self, dev_id: u32, number: u8) -> bool;

    fn set_address(&self, dev_id: u32, address: u8) -> Result<(), ErrorCode>;

    /// Enqueues `data` for transmission on an IN endpoint. For EP0, the
    /// dispatcher itself splits the IN data stage into chunks of at most
    /// `EP0_MAX_PACKET_SIZE` bytes (SS 4.3/5.3) before calling this, one
    /// call per chunk; the driver is never handed more than one EP0
    /// max-packet chunk per call and need not split further itself.
    fn transmit_in(&self, dev_id: u32, endpoint: u8, data: &[u8]) -> Result<(), ErrorCode>;
    /// Arms an OUT endpoint to receive the next packet.
    fn arm_out(&self, dev_id: u32, endpoint: u8) -> Result<(), ErrorCode>;
    /// Emits a zero-length packet, used for control status stages.
    fn send_zero_length_packet(&self, dev_id: u32, endpoint: u8) -> Result<(), ErrorCode>;
}

/// Outcome of a class/vendor request handed to an interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The interface handled the request and produced response data for an
    /// IN data stage.
    HandledWithData,
    /// The interface handled the request; no data stage follows.
    HandledNoData,
    /// The interface does not recognize this request; the dispatcher
    /// stalls EP0.
    Unsupported,
}

/// The upward contract an upper-layer class (mass storage, HID, DFU, CDC,
/// ...) implements to receive non-standard requests and endpoint
/// completions for the endpoints it registered.
pub trait ClassInterface {
    /// Called for class/vendor requests targeting this interface (chosen
    /// by `wIndex`'s low byte during classification).
    fn setup_request(&self, packet: &SetupPacket) -> RequestOutcome;

    /// Called when one of this interface's endpoints (not EP0) completes a
    /// transfer. `ep_num` is the assigned endpoint number, as written back
    /// by `declare_interface`.
    fn endpoint_completion(&self, dev_id: u32, size: usize, ep_num: u8);
}

/// The two hooks the application firmware must supply: called after a
/// successful SET_CONFIGURATION and after a bus reset, respectively.
pub trait DeviceHooks {
    fn configuration_set(&self);
    fn reset_received(&self);
}
