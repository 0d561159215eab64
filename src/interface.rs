// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface and endpoint registration.
//!
//! An interface is a USB device profile (SCSI mass storage, HID, DFU, ...)
//! built on endpoints the registry numbers lazily as interfaces are
//! declared. Endpoint 0 is reserved for control and is never handed out
//! here.

use crate::error::ErrorCode;
use crate::hil::ClassInterface;

/// Maximum number of endpoints (excluding EP0) one interface may declare.
/// Mirrors `MAX_EP_PER_PERSONALITY` in the source.
pub const MAX_ENDPOINTS_PER_INTERFACE: usize = 8;

/// Maximum number of interfaces sharing one configuration. Mirrors
/// `MAX_INTERFACES_PER_DEVICE` in the source (the source bounds this per
/// device; this crate bounds it per configuration, since a `dedicated`
/// interface gets a configuration of its own).
pub const MAX_INTERFACES_PER_CONFIGURATION: usize = 4;

/// Maximum number of configurations one device may declare.
pub const MAX_CONFIGURATIONS_PER_DEVICE: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointDirection {
    Out,
    In,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncAttribute {
    NoSync,
    Async,
    Adaptive,
    Sync,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UsageType {
    Data,
    Feedback,
    ImplicitFeedback,
}

/// One endpoint belonging to an interface. `number` starts unassigned and
/// is filled in by [`declare_interface`] as an out-parameter, exactly as
/// the source library writes endpoint identifiers back into the caller's
/// interface struct.
#[derive(Debug, Copy, Clone)]
pub struct EndpointInfo {
    pub ep_type: EndpointType,
    pub direction: EndpointDirection,
    pub sync_attr: SyncAttribute,
    pub usage: UsageType,
    pub max_packet_size: u16,
    pub number: Option<u8>,
    pub configured: bool,
}

impl EndpointInfo {
    pub const fn new(
        ep_type: EndpointType,
        direction: EndpointDirection,
        max_packet_size: u16,
    ) -> Self {
        EndpointInfo {
            ep_type,
            direction,
            sync_attr: SyncAttribute::NoSync,
            usage: UsageType::Data,
            max_packet_size,
            number: None,
            configured: false,
        }
    }
}

/// A USB interface as declared by an upper-layer class, before and after
/// registration.
///
/// `handler` is the per-interface class/vendor callback, the direct
/// analogue of the source library's per-interface function pointer field
/// (see [`crate::hil`]'s module doc for why this one stays a trait object
/// reference instead of a generic bound).
#[derive(Copy, Clone)]
pub struct Interface<'a> {
    pub usb_class: u8,
    pub usb_subclass: u8,
    pub usb_protocol: u8,
    /// When true, this interface must be the sole interface in its
    /// configuration.
    pub dedicated: bool,
    pub functional_descriptor: Option<&'static [u8]>,
    pub endpoints: [Option<EndpointInfo>; MAX_ENDPOINTS_PER_INTERFACE],
    pub endpoint_count: usize,
    /// Assigned by `declare_interface`: this interface's position within
    /// its configuration (`bInterfaceNumber`).
    pub interface_number: Option<u8>,
    pub handler: &'a dyn ClassInterface,
}

impl<'a> Interface<'a> {
    /// Starts a new interface declaration with no endpoints yet; call
    /// [`Interface::add_endpoint`] to populate it before registering with
    /// [`declare_interface`].
    pub const fn new(
        usb_class: u8,
        usb_subclass: u8,
        usb_protocol: u8,
        dedicated: bool,
        handler: &'a dyn ClassInterface,
    ) -> Self {
        Interface {
            usb_class,
            usb_subclass,
            usb_protocol,
            dedicated,
            functional_descriptor: None,
            endpoints: [None; MAX_ENDPOINTS_PER_INTERFACE],
            endpoint_count: 0,
            interface_number: None,
            handler,
        }
    }

    pub const fn with_functional_descriptor(mut self, blob: &'static [u8]) -> Self {
        self.functional_descriptor = Some(blob);
        self
    }

    /// Adds an endpoint to this interface's declaration. Fails with
    /// `NoMemory` once `MAX_ENDPOINTS_PER_INTERFACE` is reached.
    pub fn add_endpoint(&mut self, endpoint: EndpointInfo) -> Result<(), ErrorCode> {
        if self.endpoint_count >= MAX_ENDPOINTS_PER_INTERFACE {
            return Err(ErrorCode::NoMemory);
        }
        self.endpoints[self.endpoint_count] = Some(endpoint);
        self.endpoint_count += 1;
        Ok(())
    }

    fn validate(&self) -> Result<(), ErrorCode> {
        // 0x00 is reserved at the interface level (it means "composite
        // device" when it appears in the *device* descriptor); a class
        // declaring it here is malformed.
        if self.usb_class == 0x00 {
            return Err(ErrorCode::InvalidParameter);
        }
        if self.endpoint_count == 0 {
            return Err(ErrorCode::InvalidParameter);
        }
        Ok(())
    }
}

/// One configuration: a bounded set of interfaces sharing a
/// `bConfigurationValue`, plus the endpoint-numbering counter shared across
/// them.
pub struct Configuration<'a> {
    pub interfaces: [Option<Interface<'a>>; MAX_INTERFACES_PER_CONFIGURATION],
    pub interface_count: usize,
    /// First unused endpoint identifier; starts at 1 (0 is control).
    pub first_free_epid: u8,
    pub activated: bool,
    /// True once a `dedicated` interface claims this configuration; bars
    /// any further interface from joining it.
    pub dedicated: bool,
}

impl<'a> Configuration<'a> {
    pub const fn new() -> Self {
        Configuration {
            interfaces: [None, None, None, None],
            interface_count: 0,
            first_free_epid: 1,
            activated: false,
            dedicated: false,
        }
    }

    fn has_room_for(&self, iface: &Interface<'a>) -> bool {
        if self.dedicated || iface.dedicated {
            return self.interface_count == 0;
        }
        self.interface_count < MAX_INTERFACES_PER_CONFIGURATION
    }
}

impl<'a> Default for Configuration<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-context table of configurations, populated by
/// [`declare_interface`] before `start_device` and read by the descriptor
/// builder and dispatcher thereafter.
pub struct InterfaceRegistry<'a> {
    pub configurations: [Configuration<'a>; MAX_CONFIGURATIONS_PER_DEVICE],
    pub configuration_count: usize,
}

impl<'a> InterfaceRegistry<'a> {
    pub const fn new() -> Self {
        // `Configuration::new()` is const, so this array literal doesn't
        // need `Default`/`Copy` gymnastics.
        InterfaceRegistry {
            configurations: [
                Configuration::new(),
                Configuration::new(),
                Configuration::new(),
                Configuration::new(),
            ],
            configuration_count: 0,
        }
    }

    /// Resets every table to empty, as `initialize` does to a freshly
    /// declared context.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Declares a new interface: validates it, picks a target
    /// configuration (an existing shared one, or a fresh one if
    /// `dedicated`), assigns endpoint numbers from that configuration's
    /// `first_free_epid`, and writes the assigned numbers back into
    /// `iface`.
    ///
    /// Mirrors `usbctrl_declare_interface`: the source passes `iface` as an
    /// out-parameter pointer the callee fills in. The idiomatic analogue of
    /// a raw out-pointer is a unique `&mut` borrow rather than a value the
    /// callee consumes, so `iface` is mutated in place here; the registry
    /// then stores its own copy (`Interface` is `Copy`) for later lookup by
    /// the descriptor builder and dispatcher.
    pub fn declare_interface(&mut self, iface: &mut Interface<'a>) -> Result<(), ErrorCode> {
        iface.validate()?;

        let target = self.select_configuration(iface)?;
        let cfg = &mut self.configurations[target];

        let needed = iface.endpoint_count as u8;
        if cfg.first_free_epid.checked_add(needed).is_none() {
            return Err(ErrorCode::NoMemory);
        }

        let interface_number = cfg.interface_count as u8;
        iface.interface_number = Some(interface_number);

        let mut next_epid = cfg.first_free_epid;
        for slot in iface.endpoints.iter_mut().take(iface.endpoint_count) {
            if let Some(ep) = slot {
                ep.number = Some(next_epid);
                ep.configured = true;
                next_epid += 1;
            }
        }
        cfg.first_free_epid = next_epid;
        if iface.dedicated {
            cfg.dedicated = true;
        }

        let slot_index = cfg.interface_count;
        cfg.interfaces[slot_index] = Some(*iface);
        cfg.interface_count += 1;

        Ok(())
    }

    /// Picks which configuration index a new interface should land in,
    /// creating a fresh configuration when the interface is `dedicated` or
    /// no existing configuration has room.
    fn select_configuration(&mut self, iface: &Interface<'a>) -> Result<usize, ErrorCode> {
        if !iface.dedicated {
            for (i, cfg) in self.configurations[..self.configuration_count]
                .iter()
                .enumerate()
            {
                if cfg.has_room_for(iface) {
                    return Ok(i);
                }
            }
        }

        if self.configuration_count >= MAX_CONFIGURATIONS_PER_DEVICE {
            return Err(ErrorCode::NoMemory);
        }
        let index = self.configuration_count;
        self.configuration_count += 1;
        Ok(index)
    }

    pub fn configurations(&self) -> &[Configuration<'a>] {
        &self.configurations[..self.configuration_count]
    }
}

impl<'a> Default for InterfaceRegistry<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hil::RequestOutcome;
    use crate::setup::SetupPacket;

    struct NullHandler;

    impl ClassInterface for NullHandler {
        fn setup_request(&self, _packet: &SetupPacket) -> RequestOutcome {
            RequestOutcome::Unsupported
        }

        fn endpoint_completion(&self, _dev_id: u32, _size: usize, _ep_num: u8) {}
    }

    static HANDLER: NullHandler = NullHandler;

    fn hid_interface() -> Interface<'static> {
        let mut iface = Interface::new(0x03, 0x00, 0x00, false, &HANDLER);
        iface
            .add_endpoint(EndpointInfo::new(
                EndpointType::Interrupt,
                EndpointDirection::In,
                8,
            ))
            .unwrap();
        iface
            .add_endpoint(EndpointInfo::new(
                EndpointType::Interrupt,
                EndpointDirection::Out,
                8,
            ))
            .unwrap();
        iface
    }

    fn cdc_data_interface() -> Interface<'static> {
        let mut iface = Interface::new(0x0a, 0x00, 0x00, false, &HANDLER);
        iface
            .add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::In, 64))
            .unwrap();
        iface
            .add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::Out, 64))
            .unwrap();
        iface
    }

    #[test]
    fn rejects_interface_with_no_endpoints() {
        let mut iface = Interface::new(0xff, 0, 0, false, &HANDLER);
        let mut registry = InterfaceRegistry::new();
        assert_eq!(
            registry.declare_interface(&mut iface),
            Err(ErrorCode::InvalidParameter)
        );
    }

    #[test]
    fn rejects_interface_with_reserved_class_zero() {
        let mut iface = Interface::new(0x00, 0, 0, false, &HANDLER);
        iface
            .add_endpoint(EndpointInfo::new(
                EndpointType::Interrupt,
                EndpointDirection::In,
                8,
            ))
            .unwrap();
        let mut registry = InterfaceRegistry::new();
        assert_eq!(
            registry.declare_interface(&mut iface),
            Err(ErrorCode::InvalidParameter)
        );
    }

    #[test]
    fn two_shared_interfaces_get_sequential_endpoint_numbers() {
        let mut registry = InterfaceRegistry::new();
        let mut hid = hid_interface();
        let mut cdc = cdc_data_interface();
        registry.declare_interface(&mut hid).unwrap();
        registry.declare_interface(&mut cdc).unwrap();

        assert_eq!(registry.configuration_count, 1);
        let cfg = &registry.configurations()[0];
        assert_eq!(cfg.interface_count, 2);

        assert_eq!(hid.endpoints[0].unwrap().number, Some(1));
        assert_eq!(hid.endpoints[1].unwrap().number, Some(2));

        assert_eq!(cdc.endpoints[0].unwrap().number, Some(3));
        assert_eq!(cdc.endpoints[1].unwrap().number, Some(4));
    }

    #[test]
    fn dedicated_interface_gets_its_own_configuration() {
        let mut registry = InterfaceRegistry::new();
        let mut hid = hid_interface();
        registry.declare_interface(&mut hid).unwrap();

        let mut dfu = Interface::new(0xfe, 0x01, 0x02, true, &HANDLER);
        dfu.add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::In, 64))
            .unwrap();
        registry.declare_interface(&mut dfu).unwrap();

        assert_eq!(registry.configuration_count, 2);
        assert_eq!(registry.configurations()[1].interface_count, 1);
    }

    #[test]
    fn dedicated_interface_refuses_to_share_with_an_existing_one() {
        // A dedicated interface always starts a fresh configuration, so it
        // can never end up sharing with an interface already declared.
        let mut registry = InterfaceRegistry::new();
        let mut hid = hid_interface();
        registry.declare_interface(&mut hid).unwrap();

        let mut dfu = Interface::new(0xfe, 0, 0, true, &HANDLER);
        dfu.add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::In, 64))
            .unwrap();
        registry.declare_interface(&mut dfu).unwrap();

        for cfg in registry.configurations() {
            if cfg.dedicated {
                assert_eq!(cfg.interface_count, 1);
            }
        }
    }

    #[test]
    fn configuration_capacity_is_enforced() {
        let mut registry = InterfaceRegistry::new();
        for _ in 0..MAX_CONFIGURATIONS_PER_DEVICE {
            let mut dfu = Interface::new(0xfe, 0, 0, true, &HANDLER);
            dfu.add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::In, 64))
                .unwrap();
            registry.declare_interface(&mut dfu).unwrap();
        }
        let mut one_too_many = Interface::new(0xfe, 0, 0, true, &HANDLER);
        one_too_many
            .add_endpoint(EndpointInfo::new(EndpointType::Bulk, EndpointDirection::In, 64))
            .unwrap();
        assert_eq!(
            registry.declare_interface(&mut one_too_many),
            Err(ErrorCode::NoMemory)
        );
    }
}
