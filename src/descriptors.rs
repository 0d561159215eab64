// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Descriptor synthesis: device, configuration (with embedded interface,
//! endpoint and functional descriptors), and string descriptors, composed
//! on demand from the interface registry.
//!
//! Each descriptor type knows its own serialized size and how to write
//! itself into a caller-provided buffer, mirroring the `Descriptor` trait
//! this module is grounded on (an earlier revision of this capsule tree's
//! platform-independent `usb.rs`).

use crate::interface::{EndpointDirection, EndpointType, InterfaceRegistry};

/// `bcdUSB`: this core only ever advertises USB 2.0.
pub const BCD_USB_2_0: u16 = 0x0200;

/// Max packet size for EP0, fixed at 64 bytes (this core is high-speed
/// only; see `DeviceQualifier` below).
pub const EP0_MAX_PACKET_SIZE: u8 = 64;

/// Vendor/product/version/string-index constants supplied by the firmware,
/// read verbatim into the device descriptor.
#[derive(Debug, Copy, Clone)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_release: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_number_string: u8,
}

/// Something that can serialize itself into a byte buffer and report its
/// own length.
pub trait Descriptor {
    /// Serialized size in bytes.
    fn size(&self) -> usize;

    /// Writes the descriptor into `buf`, returning the number of bytes
    /// written, or 0 if `buf` is too small to hold it.
    fn write_to(&self, buf: &mut [u8]) -> usize {
        if buf.len() < self.size() {
            0
        } else {
            self.write_to_unchecked(buf)
        }
    }

    /// Same as [`Descriptor::write_to`] but assumes the caller already
    /// checked `buf.len() >= self.size()`.
    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize;
}

fn put_u16(buf: &mut [u8], value: u16) {
    buf[0..2].copy_from_slice(&value.to_le_bytes());
}

/// The 18-byte device descriptor.
///
/// `class`/`subclass`/`protocol` are 0 (composite) unless exactly one
/// interface has been declared across every configuration and it is not
/// `dedicated`, in which case that interface's class triple is reported
/// here instead -- decided by [`DeviceDescriptor::for_registry`], not by
/// this struct itself.
pub struct DeviceDescriptor {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub identity: DeviceIdentity,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Derives the device descriptor's class triple and configuration
    /// count from the interface registry, per SS 5.4's rule: a single
    /// non-dedicated interface promotes its class triple to the device
    /// descriptor; anything else reports class 0 (composite).
    pub fn for_registry(registry: &InterfaceRegistry, identity: DeviceIdentity) -> Self {
        let mut total_interfaces = 0usize;
        let mut only: Option<(u8, u8, u8, bool)> = None;
        for cfg in registry.configurations() {
            for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
                total_interfaces += 1;
                only = Some((iface.usb_class, iface.usb_subclass, iface.usb_protocol, iface.dedicated));
            }
        }

        let (class, subclass, protocol) = match (total_interfaces, only) {
            (1, Some((class, subclass, protocol, false))) => (class, subclass, protocol),
            _ => (0, 0, 0),
        };

        DeviceDescriptor {
            class,
            subclass,
            protocol,
            identity,
            num_configurations: registry.configuration_count as u8,
        }
    }
}

impl Descriptor for DeviceDescriptor {
    fn size(&self) -> usize {
        18
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[0] = 18;
        buf[1] = crate::setup::DescriptorType::Device.as_u8();
        put_u16(&mut buf[2..4], BCD_USB_2_0);
        buf[4] = self.class;
        buf[5] = self.subclass;
        buf[6] = self.protocol;
        buf[7] = EP0_MAX_PACKET_SIZE;
        put_u16(&mut buf[8..10], self.identity.vendor_id);
        put_u16(&mut buf[10..12], self.identity.product_id);
        put_u16(&mut buf[12..14], self.identity.device_release);
        buf[14] = self.identity.manufacturer_string;
        buf[15] = self.identity.product_string;
        buf[16] = self.identity.serial_number_string;
        buf[17] = self.num_configurations;
        18
    }
}

/// `bmAttributes` of the configuration descriptor: bit 7 is always set
/// (reserved, must be one); bits 6 and 5 are self-powered / remote-wakeup.
#[derive(Debug, Copy, Clone)]
pub struct ConfigurationAttributes {
    pub self_powered: bool,
    pub remote_wakeup: bool,
}

impl ConfigurationAttributes {
    pub fn as_u8(self) -> u8 {
        0x80 | if self.self_powered { 0x40 } else { 0 } | if self.remote_wakeup { 0x20 } else { 0 }
    }
}

fn endpoint_address(number: u8, direction: EndpointDirection) -> u8 {
    (number & 0x0f)
        | match direction {
            EndpointDirection::Out => 0,
            EndpointDirection::In => 0x80,
        }
}

fn endpoint_type_code(ep_type: EndpointType) -> u8 {
    match ep_type {
        EndpointType::Control => 0,
        EndpointType::Isochronous => 1,
        EndpointType::Bulk => 2,
        EndpointType::Interrupt => 3,
    }
}

/// Assembles the full configuration descriptor blob for configuration
/// index `config_index`: the 9-byte configuration header, then for each
/// interface its 9-byte interface descriptor, its functional descriptor
/// (verbatim) if present, then one 7-byte endpoint descriptor per endpoint.
///
/// `wTotalLength` is filled in after assembly. If `buf` is shorter than the
/// full blob, writes as much as fits and returns that truncated length --
/// per SS 5.4, it is the host's job to re-request with the correct
/// `wLength` once it has read the header.
pub fn build_configuration_descriptor(
    registry: &InterfaceRegistry,
    config_index: usize,
    configuration_value: u8,
    attributes: ConfigurationAttributes,
    max_power: u8,
    buf: &mut [u8],
) -> usize {
    let configs = registry.configurations();
    let Some(cfg) = configs.get(config_index) else {
        return 0;
    };

    let mut total_len = 9usize;
    for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
        total_len += 9;
        if let Some(func) = iface.functional_descriptor {
            total_len += func.len();
        }
        total_len += iface.endpoint_count * 7;
    }

    let mut written = 0usize;
    let mut emit = |bytes: &[u8], written: &mut usize, buf: &mut [u8]| {
        let start = *written;
        let end = (start + bytes.len()).min(buf.len());
        if end > start {
            buf[start..end].copy_from_slice(&bytes[..end - start]);
        }
        *written += bytes.len();
    };

    // Configuration header.
    let mut header = [0u8; 9];
    header[0] = 9;
    header[1] = crate::setup::DescriptorType::Configuration.as_u8();
    header[2..4].copy_from_slice(&(total_len as u16).to_le_bytes());
    header[4] = cfg.interface_count as u8;
    header[5] = configuration_value;
    header[6] = 0; // no configuration string
    header[7] = attributes.as_u8();
    header[8] = max_power;
    emit(&header, &mut written, buf);

    for iface in cfg.interfaces[..cfg.interface_count].iter().flatten() {
        let mut iface_bytes = [0u8; 9];
        iface_bytes[0] = 9;
        iface_bytes[1] = crate::setup::DescriptorType::Interface.as_u8();
        iface_bytes[2] = iface.interface_number.unwrap_or(0);
        iface_bytes[3] = 0; // bAlternateSetting, always 0 in this core
        iface_bytes[4] = iface.endpoint_count as u8;
        iface_bytes[5] = iface.usb_class;
        iface_bytes[6] = iface.usb_subclass;
        iface_bytes[7] = iface.usb_protocol;
        iface_bytes[8] = 0; // no interface string
        emit(&iface_bytes, &mut written, buf);

        if let Some(func) = iface.functional_descriptor {
            emit(func, &mut written, buf);
        }

        for ep in iface.endpoints[..iface.endpoint_count].iter().flatten() {
            let mut ep_bytes = [0u8; 7];
            ep_bytes[0] = 7;
            ep_bytes[1] = crate::setup::DescriptorType::Endpoint.as_u8();
            ep_bytes[2] = endpoint_address(ep.number.unwrap_or(0), ep.direction);
            ep_bytes[3] = endpoint_type_code(ep.ep_type);
            ep_bytes[4..6].copy_from_slice(&(ep.max_packet_size & 0x7ff).to_le_bytes());
            ep_bytes[6] = 0; // bInterval: polled classes set their own value via the functional descriptor
            emit(&ep_bytes, &mut written, buf);
        }
    }

    written.min(buf.len())
}

/// String descriptor index 0: the supported-languages array.
pub struct LanguagesDescriptor<'a> {
    pub languages: &'a [u16],
}

impl Descriptor for LanguagesDescriptor<'_> {
    fn size(&self) -> usize {
        2 + 2 * self.languages.len()
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        let len = self.size();
        buf[0] = len as u8;
        buf[1] = crate::setup::DescriptorType::String.as_u8();
        for (i, lang) in self.languages.iter().enumerate() {
            put_u16(&mut buf[2 + 2 * i..4 + 2 * i], *lang);
        }
        len
    }
}

/// A UTF-16LE-encoded firmware string, for indices 1..N.
pub struct StringDescriptor<'a> {
    pub string: &'a str,
}

impl Descriptor for StringDescriptor<'_> {
    fn size(&self) -> usize {
        2 + self.string.encode_utf16().count() * 2
    }

    fn write_to_unchecked(&self, buf: &mut [u8]) -> usize {
        buf[1] = crate::setup::DescriptorType::String.as_u8();
        let mut i = 2;
        for unit in self.string.encode_utf16() {
            put_u16(&mut buf[i..i + 2], unit);
            i += 2;
        }
        buf[0] = i as u8;
        i
    }
}

/// The supported languages array this core always advertises: English
/// (United States) only.
pub const SUPPORTED_LANGUAGES: [u16; 1] = [0x0409];

#[cfg(test)]
mod test {
    use super::*;
    use crate::hil::{ClassInterface, RequestOutcome};
    use crate::interface::{EndpointInfo, Interface};
    use crate::setup::SetupPacket;

    struct NullHandler;

    impl ClassInterface for NullHandler {
        fn setup_request(&self, _packet: &SetupPacket) -> RequestOutcome {
            RequestOutcome::Unsupported
        }

        fn endpoint_completion(&self, _dev_id: u32, _size: usize, _ep_num: u8) {}
    }

    static HANDLER: NullHandler = NullHandler;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x1234,
            product_id: 0x5678,
            device_release: 0x0100,
            manufacturer_string: 1,
            product_string: 2,
            serial_number_string: 3,
        }
    }

    #[test]
    fn device_descriptor_is_18_bytes() {
        let registry = InterfaceRegistry::new();
        let dd = DeviceDescriptor::for_registry(&registry, identity());
        let mut buf = [0u8; 18];
        assert_eq!(dd.write_to(&mut buf), 18);
        assert_eq!(buf[0], 18);
        assert_eq!(buf[1], 1);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), BCD_USB_2_0);
    }

    #[test]
    fn single_non_dedicated_interface_promotes_its_class_triple() {
        let mut registry = InterfaceRegistry::new();
        let mut iface = Interface::new(0x03, 0x01, 0x02, false, &HANDLER);
        iface
            .add_endpoint(EndpointInfo::new(
                crate::interface::EndpointType::Interrupt,
                EndpointDirection::In,
                8,
            ))
            .unwrap();
        registry.declare_interface(&mut iface).unwrap();

        let dd = DeviceDescriptor::for_registry(&registry, identity());
        assert_eq!((dd.class, dd.subclass, dd.protocol), (0x03, 0x01, 0x02));
    }

    #[test]
    fn two_interfaces_report_composite_class() {
        let mut registry = InterfaceRegistry::new();
        for _ in 0..2 {
            let mut iface = Interface::new(0x03, 0, 0, false, &HANDLER);
            iface
                .add_endpoint(EndpointInfo::new(
                    crate::interface::EndpointType::Interrupt,
                    EndpointDirection::In,
                    8,
                ))
                .unwrap();
            registry.declare_interface(&mut iface).unwrap();
        }
        let dd = DeviceDescriptor::for_registry(&registry, identity());
        assert_eq!((dd.class, dd.subclass, dd.protocol), (0, 0, 0));
    }

    /// Scenario 5: HID (1 IN + 1 OUT interrupt) then CDC_DATA (1 IN + 1 OUT
    /// bulk), both shared, non-dedicated. Endpoints 1..4 in declaration
    /// order; total length 9 + 2*(9 + 2*7) = 55.
    #[test]
    fn two_interface_configuration_blob_matches_expected_length() {
        let mut registry = InterfaceRegistry::new();

        let mut hid = Interface::new(0x03, 0, 0, false, &HANDLER);
        hid.add_endpoint(EndpointInfo::new(
            crate::interface::EndpointType::Interrupt,
            EndpointDirection::In,
            8,
        ))
        .unwrap();
        hid.add_endpoint(EndpointInfo::new(
            crate::interface::EndpointType::Interrupt,
            EndpointDirection::Out,
            8,
        ))
        .unwrap();
        registry.declare_interface(&mut hid).unwrap();

        let mut cdc = Interface::new(0x0a, 0, 0, false, &HANDLER);
        cdc.add_endpoint(EndpointInfo::new(crate::interface::EndpointType::Bulk, EndpointDirection::In, 64))
            .unwrap();
        cdc.add_endpoint(EndpointInfo::new(crate::interface::EndpointType::Bulk, EndpointDirection::Out, 64))
            .unwrap();
        registry.declare_interface(&mut cdc).unwrap();

        let mut buf = [0u8; 64];
        let written = build_configuration_descriptor(
            &registry,
            0,
            1,
            ConfigurationAttributes {
                self_powered: true,
                remote_wakeup: false,
            },
            50,
            &mut buf,
        );

        assert_eq!(written, 55);
        let total_length = u16::from_le_bytes([buf[2], buf[3]]);
        assert_eq!(total_length as usize, written);
        assert_eq!(buf[4], 2); // bNumInterfaces
    }

    #[test]
    fn truncates_when_buffer_is_shorter_than_wlength() {
        let mut registry = InterfaceRegistry::new();
        let mut hid = Interface::new(0x03, 0, 0, false, &HANDLER);
        hid.add_endpoint(EndpointInfo::new(
            crate::interface::EndpointType::Interrupt,
            EndpointDirection::In,
            8,
        ))
        .unwrap();
        registry.declare_interface(&mut hid).unwrap();

        let mut buf = [0u8; 9]; // only room for the configuration header
        let written = build_configuration_descriptor(
            &registry,
            0,
            1,
            ConfigurationAttributes {
                self_powered: true,
                remote_wakeup: false,
            },
            50,
            &mut buf,
        );
        assert_eq!(written, 9);
        // wTotalLength still reports the *full* blob length, even though
        // only the header made it into `buf` -- the host uses it to decide
        // how large a follow-up GET_DESCRIPTOR to issue.
        let total_length = u16::from_le_bytes([buf[2], buf[3]]);
        assert_eq!(total_length as usize, 9 + 9 + 7);
    }

    #[test]
    fn languages_descriptor_round_trips() {
        let desc = LanguagesDescriptor {
            languages: &SUPPORTED_LANGUAGES,
        };
        let mut buf = [0u8; 4];
        assert_eq!(desc.write_to(&mut buf), 4);
        assert_eq!(buf, [4, 3, 0x09, 0x04]);
    }

    #[test]
    fn string_descriptor_encodes_utf16le() {
        let desc = StringDescriptor { string: "Hi" };
        let mut buf = [0u8; 6];
        assert_eq!(desc.write_to(&mut buf), 6);
        assert_eq!(buf, [6, 3, b'H', 0, b'i', 0]);
    }
}
