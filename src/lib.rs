// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Device-side USB 2.0 control plane.
//!
//! This crate implements the parts of a USB device stack that do not
//! touch a FIFO: the chapter 9 state automaton, the EP0 standard-request
//! dispatcher, and descriptor synthesis. It is driven by a hardware
//! driver implementing [`hil::UsbHardware`] and read by upper-layer
//! classes implementing [`hil::ClassInterface`]; everything below the
//! wire and above the bytes is someone else's problem.
//!
//! A board wires this crate up roughly as follows:
//!
//! ```ignore
//! static HANDLER: MyClass = MyClass::new();
//! let ctx = DeviceContext::new(&my_driver, MyHooks, identity);
//! ctx.declare()?;
//! ctx.initialize();
//! let mut iface = Interface::new(USB_CLASS_HID, 0, 0, false, &HANDLER);
//! iface.add_endpoint(EndpointInfo::new(EndpointType::Interrupt, EndpointDirection::In, 8))?;
//! ctx.declare_interface(&mut iface)?;
//! ctx.start_device()?;
//! REGISTRY.register(&ctx)?;
//! ```
//!
//! Thereafter the driver's interrupt handler looks the context up by
//! `dev_id` in a [`registry::ContextRegistry`] and forwards hardware
//! events to the matching `on_*` method on [`context::DeviceContext`].

#![no_std]
#![forbid(unsafe_code)]

pub mod automaton;
pub mod context;
pub mod descriptors;
mod dispatcher;
pub mod error;
pub mod hil;
pub mod interface;
mod log;
pub mod registry;
pub mod setup;

pub use automaton::{Event, State};
pub use context::DeviceContext;
pub use descriptors::DeviceIdentity;
pub use error::{CtrlResult, ErrorCode};
pub use hil::{ClassInterface, DeviceHooks, RequestOutcome, UsbHardware};
pub use interface::{EndpointDirection, EndpointInfo, EndpointType, Interface};
pub use registry::ContextRegistry;
pub use setup::SetupPacket;
