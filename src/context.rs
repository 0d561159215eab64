// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The per-device context: the struct every other module in this crate
//! ultimately operates on, and the home of the hardware-driver event glue
//! (SS 5.5 of the distilled spec).
//!
//! A context is created by [`DeviceContext::declare`], brought to life by
//! [`DeviceContext::initialize`], populated by [`DeviceContext::declare_interface`]
//! calls until [`DeviceContext::start_device`], and torn down by
//! [`DeviceContext::release`]. Exactly one [`DeviceContext`] exists per
//! physical USB controller; [`crate::registry::ContextRegistry`] is the
//! table a board's interrupt handler uses to find it from a bare `dev_id`.

use tock_cells::map_cell::MapCell;
use tock_cells::optional_cell::OptionalCell;
use tock_cells::volatile_cell::VolatileCell;

use crate::automaton::{Event, State};
use crate::descriptors::DeviceIdentity;
use crate::dispatcher;
use crate::error::ErrorCode;
use crate::hil::{DeviceHooks, UsbHardware};
use crate::interface::{Interface, InterfaceRegistry};
use crate::setup::SetupPacket;

/// Size of the fixed buffer dedicated to EP0 OUT data stages. Generous
/// enough for any control-OUT payload a class registered with this core is
/// expected to send (the core itself never needs more than a few bytes).
pub const EP0_RX_BUFFER_SIZE: usize = 64;

/// Guards `ep0_rx_buffer` ownership between the hardware driver (producer,
/// writes only while `Busy`) and the dispatcher (consumer, reads only while
/// `Ready`). The cycle is `NoStorage -> Free -> Busy -> Ready -> Free`; no
/// transition skips a step.
///
/// `Busy` is only ever entered by a request that needs a control-OUT data
/// stage. None of the standard requests this core implements need one
/// (SET_DESCRIPTOR, the only candidate, stalls); consuming a class/vendor
/// request's OUT payload is class-specific payload semantics, out of scope
/// per the spec's non-goals. The cycle stays modeled here, ready for a
/// future class hook to drive it, but nothing currently arms `Busy`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ep0RxState {
    /// `initialize` has run but no OUT stage has been armed yet.
    NoStorage,
    /// Free for the dispatcher to arm for the next OUT data stage.
    Free,
    /// Armed; the driver owns the buffer and may write into it.
    Busy,
    /// The driver completed a write; the dispatcher owns the buffer until
    /// it consumes the data and returns the state to `Free`.
    Ready,
}

/// The full set of per-context state described in SS 3 of the distilled
/// spec.
pub struct DeviceContext<'a, H: DeviceHooks> {
    driver: &'a dyn UsbHardware,
    hooks: H,
    identity: DeviceIdentity,
    strings: OptionalCell<&'a [&'a str]>,

    dev_id: OptionalCell<u32>,
    address: VolatileCell<u8>,
    state: crate::automaton::Automaton,

    registry: MapCell<InterfaceRegistry<'a>>,
    current_configuration: VolatileCell<u8>,
    remote_wakeup: VolatileCell<bool>,
    self_powered: VolatileCell<bool>,

    /// `wValue` from a pending SET_ADDRESS, programmed into the hardware
    /// only once the status stage has completed (SS 4.3).
    pending_address: OptionalCell<u8>,

    ep0_rx_buffer: MapCell<[u8; EP0_RX_BUFFER_SIZE]>,
    ep0_rx_len: VolatileCell<usize>,
    ep0_rx_state: VolatileCell<Ep0RxState>,

    started: VolatileCell<bool>,
}

impl<'a, H: DeviceHooks> DeviceContext<'a, H> {
    /// Constructs a context that has not yet asked the driver for a
    /// `dev_id`. Call [`DeviceContext::declare`] before anything else.
    pub fn new(driver: &'a dyn UsbHardware, hooks: H, identity: DeviceIdentity) -> Self {
        DeviceContext {
            driver,
            hooks,
            identity,
            strings: OptionalCell::empty(),
            dev_id: OptionalCell::empty(),
            address: VolatileCell::new(0),
            state: crate::automaton::Automaton::new(),
            registry: MapCell::new(InterfaceRegistry::new()),
            current_configuration: VolatileCell::new(0),
            remote_wakeup: VolatileCell::new(false),
            self_powered: VolatileCell::new(false),
            pending_address: OptionalCell::empty(),
            ep0_rx_buffer: MapCell::new([0u8; EP0_RX_BUFFER_SIZE]),
            ep0_rx_len: VolatileCell::new(0),
            ep0_rx_state: VolatileCell::new(Ep0RxState::NoStorage),
            started: VolatileCell::new(false),
        }
    }

    /// Firmware-provided string table backing GET_DESCRIPTOR(STRING, n)
    /// for n >= 1; index 0 of this slice is string index 1 on the wire.
    pub fn set_strings(&self, strings: &'a [&'a str]) {
        self.strings.set(strings);
    }

    pub(crate) fn strings(&self) -> Option<&'a [&'a str]> {
        self.strings.extract()
    }

    pub(crate) fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub(crate) fn driver(&self) -> &'a dyn UsbHardware {
        self.driver
    }

    pub(crate) fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn dev_id(&self) -> Option<u32> {
        self.dev_id.extract()
    }

    pub fn state(&self) -> State {
        self.state.state()
    }

    pub fn address(&self) -> u8 {
        self.address.get()
    }

    pub fn current_configuration(&self) -> u8 {
        self.current_configuration.get()
    }

    pub(crate) fn set_current_configuration(&self, value: u8) {
        self.current_configuration.set(value);
    }

    pub fn remote_wakeup(&self) -> bool {
        self.remote_wakeup.get()
    }

    pub(crate) fn set_remote_wakeup(&self, enabled: bool) {
        self.remote_wakeup.set(enabled);
    }

    pub fn self_powered(&self) -> bool {
        self.self_powered.get()
    }

    pub fn set_self_powered(&self, enabled: bool) {
        self.self_powered.set(enabled);
    }

    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&InterfaceRegistry<'a>) -> R) -> R {
        self.registry
            .map(|registry| f(registry))
            .expect("registry MapCell is never left empty")
    }

    fn with_registry_mut<R>(&self, f: impl FnOnce(&mut InterfaceRegistry<'a>) -> R) -> R {
        self.registry
            .map(|registry| f(registry))
            .expect("registry MapCell is never left empty")
    }

    /// SS 4.1 `declare`: asks the driver for a device id and stores it.
    /// Does not touch the process-wide registry -- callers pass `&self` to
    /// [`crate::registry::ContextRegistry::register`] separately, mirroring
    /// the source's two-step `declare` / table insertion.
    pub fn declare(&self) -> Result<(), ErrorCode> {
        if self.dev_id.is_some() {
            return Err(ErrorCode::InvalidState);
        }
        let id = self.driver.declare_device().map_err(|_| {
            crate::log::driver_error("declare_device");
            ErrorCode::DriverError
        })?;
        self.dev_id.set(id);
        Ok(())
    }

    /// SS 4.1 `initialize`: zeroes the interface tables, resets the
    /// automaton to `Attached`, and marks EP0 as having no armed storage
    /// yet.
    pub fn initialize(&self) {
        self.with_registry_mut(|registry| registry.reset());
        self.state.set_state(State::Attached);
        self.current_configuration.set(0);
        self.address.set(0);
        self.remote_wakeup.set(false);
        self.pending_address.clear();
        self.ep0_rx_state.set(Ep0RxState::NoStorage);
        self.started.set(false);
    }

    /// SS 4.1 `declare_interface`: forbidden once [`DeviceContext::start_device`]
    /// has run.
    pub fn declare_interface(&self, iface: &mut Interface<'a>) -> Result<(), ErrorCode> {
        match self.state() {
            State::Attached | State::Powered => {}
            _ => return Err(ErrorCode::InvalidState),
        }
        self.with_registry_mut(|registry| registry.declare_interface(iface))
    }

    pub fn bind(&self) -> Result<(), ErrorCode> {
        let dev_id = self.dev_id.extract().ok_or(ErrorCode::InvalidState)?;
        self.driver.map(dev_id).map_err(|_| ErrorCode::DriverError)
    }

    pub fn unbind(&self) -> Result<(), ErrorCode> {
        let dev_id = self.dev_id.extract().ok_or(ErrorCode::InvalidState)?;
        self.driver.unmap(dev_id).map_err(|_| ErrorCode::DriverError)
    }

    pub fn release(&self) -> Result<(), ErrorCode> {
        let dev_id = self.dev_id.extract().ok_or(ErrorCode::InvalidState)?;
        self.driver
            .release_device(dev_id)
            .map_err(|_| ErrorCode::DriverError)?;
        self.dev_id.clear();
        Ok(())
    }

    /// SS 4.1 `start_device`: enables the hardware IP. The automaton itself
    /// only moves `Attached -> Powered` once the driver reports the first
    /// bus activity (`hub_configured`), not synchronously here.
    pub fn start_device(&self) -> Result<(), ErrorCode> {
        let dev_id = self.dev_id.extract().ok_or(ErrorCode::InvalidState)?;
        self.driver.enable_device(dev_id).map_err(|_| {
            crate::log::driver_error("enable_device");
            ErrorCode::DriverError
        })?;
        self.ep0_rx_state.set(Ep0RxState::Free);
        self.started.set(true);
        Ok(())
    }

    /// `stop_device`: resolves the source's "unmap and then?" open question
    /// (SS 9) as disable every registered endpoint, transition to
    /// `Attached`, and leave configurations/interfaces/endpoint numbering
    /// intact so the device can be restarted without re-declaring every
    /// interface.
    pub fn stop_device(&self) -> Result<(), ErrorCode> {
        let dev_id = self.dev_id.extract().ok_or(ErrorCode::InvalidState)?;
        self.with_registry(|registry| {
            for cfg in registry.configurations() {
                for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
                    for ep in iface.endpoints[..iface.endpoint_count].iter().flatten() {
                        if let Some(number) = ep.number {
                            let _ = self.driver.disable_endpoint(dev_id, number);
                        }
                    }
                }
            }
        });
        self.state.set_state(State::Attached);
        self.current_configuration.set(0);
        self.started.set(false);
        Ok(())
    }

    /// Applies a transition looked up in the automaton table, panicking
    /// only in debug builds never reached by this crate's own callers (the
    /// transition functions below always consult `next_state` first).
    fn apply(&self, event: Event) -> bool {
        match crate::automaton::next_state(self.state(), event) {
            Some(next) => {
                self.state.set_state(next);
                true
            }
            None => false,
        }
    }

    // ---- Event glue (SS 4.5) ----------------------------------------

    /// The driver calls this on the first sign of bus activity after
    /// `start_device`, and again whenever the host deconfigures the hub
    /// port.
    pub fn on_hub_configured(&self) {
        self.apply(Event::HubConfigured);
    }

    pub fn on_hub_reset(&self) {
        self.apply(Event::HubReset);
    }

    pub fn on_hub_deconfigured(&self) {
        self.apply(Event::HubDeconfigured);
    }

    /// `on_reset`: move to `Default`, clear `address` and
    /// `current_configuration`, notify the upper layer.
    pub fn on_reset(&self) {
        self.apply(Event::Reset);
        self.address.set(0);
        self.current_configuration.set(0);
        self.pending_address.clear();
        self.hooks.reset_received();
    }

    /// `on_suspend`: drives `X -> SuspendedX` for the current state.
    pub fn on_suspend(&self) {
        self.apply(Event::BusInactive);
    }

    /// `on_wakeup`: drives `SuspendedX -> X` for the current state.
    pub fn on_wakeup(&self) {
        self.apply(Event::BusActive);
    }

    /// `on_setup`: a SETUP packet arrived on EP0. Parses it and hands it to
    /// the dispatcher; a malformed packet is itself a protocol stall.
    pub fn on_setup(&self, packet_bytes: &[u8]) {
        match SetupPacket::parse(packet_bytes) {
            Ok(packet) => dispatcher::dispatch(self, &packet),
            Err(_) => self.stall_ep0(),
        }
    }

    /// `on_out_complete`: for EP0, a control-OUT data stage or status stage
    /// finished; for any other endpoint, forwarded to the owning
    /// interface's completion callback.
    pub fn on_out_complete(&self, endpoint: u8, size: usize) {
        if endpoint == 0 {
            if self.ep0_rx_state.get() == Ep0RxState::Busy {
                self.ep0_rx_len.set(size);
                self.ep0_rx_state.set(Ep0RxState::Ready);
            }
            return;
        }
        self.dispatch_endpoint_completion(endpoint, size);
    }

    /// `on_in_complete`: for EP0, advances the SET_ADDRESS sequencing (SS
    /// 4.3: the address is only programmed after the status stage
    /// completes); for any other endpoint, forwarded to the owning
    /// interface.
    pub fn on_in_complete(&self, endpoint: u8) {
        if endpoint == 0 {
            if let Some(new_address) = self.pending_address.extract() {
                self.pending_address.clear();
                if let Some(dev_id) = self.dev_id.extract() {
                    let _ = self.driver.set_address(dev_id, new_address);
                }
                self.address.set(new_address);
                if new_address == 0 {
                    // wValue == 0 moves Address -> Default; reuse the Reset
                    // transition, which reaches Default from any
                    // non-Attached state, matching the source's handling of
                    // SET_ADDRESS(0).
                    self.apply(Event::Reset);
                } else {
                    self.apply(Event::AddressAssigned);
                }
            }
            return;
        }
        self.dispatch_endpoint_completion(endpoint, 0);
    }

    fn dispatch_endpoint_completion(&self, endpoint: u8, size: usize) {
        let dev_id = match self.dev_id.extract() {
            Some(id) => id,
            None => return,
        };
        self.with_registry(|registry| {
            for cfg in registry.configurations() {
                for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
                    for ep in iface.endpoints[..iface.endpoint_count].iter().flatten() {
                        if ep.number == Some(endpoint) {
                            iface.handler.endpoint_completion(dev_id, size, endpoint);
                            return;
                        }
                    }
                }
            }
        });
    }

    // ---- Dispatcher support -------------------------------------------

    pub(crate) fn automaton_apply(&self, event: Event) -> bool {
        self.apply(event)
    }

    pub(crate) fn dev_id_or_stall(&self) -> Option<u32> {
        self.dev_id.extract()
    }

    pub(crate) fn stall_ep0(&self) {
        if let Some(dev_id) = self.dev_id.extract() {
            crate::log::protocol_stall(dev_id, 0);
            let _ = self.driver.stall_endpoint(dev_id, 0);
        }
    }

    pub(crate) fn send_status_in(&self, dev_id: u32) {
        let _ = self.driver.send_zero_length_packet(dev_id, 0);
    }

    pub(crate) fn arm_status_out(&self, dev_id: u32) {
        let _ = self.driver.arm_out(dev_id, 0);
    }

    pub(crate) fn transmit_ep0(&self, dev_id: u32, data: &[u8]) {
        let _ = self.driver.transmit_in(dev_id, 0, data);
    }

    pub(crate) fn schedule_address(&self, value: u8) {
        self.pending_address.set(value);
    }

    pub(crate) fn configure_endpoints_for(&self, dev_id: u32, config_index: usize, enable: bool) {
        self.with_registry(|registry| {
            let configs = registry.configurations();
            if let Some(cfg) = configs.get(config_index) {
                for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
                    for ep in iface.endpoints[..iface.endpoint_count].iter().flatten() {
                        if let Some(number) = ep.number {
                            if enable {
                                let direction = ep.direction;
                                let _ = self.driver.configure_endpoint(
                                    dev_id,
                                    number,
                                    ep.ep_type,
                                    direction,
                                    ep.max_packet_size,
                                );
                                let _ = self.driver.enable_endpoint(dev_id, number);
                            } else {
                                let _ = self.driver.disable_endpoint(dev_id, number);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Resolves a class/vendor request's `wIndex` interface number to a
    /// handler, restricted to the *active* configuration: interface
    /// numbers restart at 0 in each configuration (SS 5.1), so the lookup
    /// must not scan configurations the host hasn't selected.
    pub(crate) fn find_interface_handler(
        &self,
        interface_number: u8,
    ) -> Option<&'a dyn crate::hil::ClassInterface> {
        let current = self.current_configuration.get();
        if current == 0 {
            return None;
        }
        let index = current as usize - 1;
        self.with_registry(|registry| {
            let cfg = registry.configurations().get(index)?;
            for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
                if iface.interface_number == Some(interface_number) {
                    return Some(iface.handler);
                }
            }
            None
        })
    }

    pub(crate) fn endpoint_is_halted(&self, dev_id: u32, number: u8) -> bool {
        self.driver.is_endpoint_stalled(dev_id, number)
    }

    pub(crate) fn set_endpoint_halt(&self, dev_id: u32, number: u8, halted: bool) -> Result<(), ErrorCode> {
        if halted {
            self.driver.stall_endpoint(dev_id, number)
        } else {
            self.driver.clear_stall_endpoint(dev_id, number)
        }
        .map_err(|_| ErrorCode::DriverError)
    }
}

#[cfg(test)]
pub(crate) fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x1209,
        product_id: 0x0001,
        device_release: 0x0100,
        manufacturer_string: 1,
        product_string: 2,
        serial_number_string: 0,
    }
}
