// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The 8-byte SETUP packet and its `bmRequestType` bitfield.

use enum_primitive::cast::FromPrimitive;
use enum_primitive::enum_from_primitive;

use crate::error::ErrorCode;

/// Direction bit (7) of `bmRequestType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

/// Type bits (6:5) of `bmRequestType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestClass {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Recipient bits (4:0) of `bmRequestType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

/// The raw `bmRequestType` byte, decoded on demand rather than eagerly, so
/// the type stays a trivial newtype over the wire byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestType(pub u8);

impl RequestType {
    pub fn direction(self) -> TransferDirection {
        if self.0 & 0x80 == 0 {
            TransferDirection::HostToDevice
        } else {
            TransferDirection::DeviceToHost
        }
    }

    pub fn class(self) -> RequestClass {
        match (self.0 >> 5) & 0b11 {
            0 => RequestClass::Standard,
            1 => RequestClass::Class,
            2 => RequestClass::Vendor,
            _ => RequestClass::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

enum_from_primitive! {
/// The standard request codes (`bRequest`) the dispatcher recognizes when
/// `RequestType::class() == RequestClass::Standard`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}
}

impl StandardRequest {
    fn from_code(code: u8) -> Option<Self> {
        StandardRequest::from_u8(code)
    }
}

enum_from_primitive! {
/// A feature selector, as used by CLEAR_FEATURE / SET_FEATURE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FeatureSelector {
    EndpointHalt = 0,
    DeviceRemoteWakeup = 1,
    TestMode = 2,
}
}

impl FeatureSelector {
    fn from_value(value: u16) -> Option<Self> {
        FeatureSelector::from_u16(value)
    }
}

enum_from_primitive! {
/// A GET_DESCRIPTOR / SET_DESCRIPTOR descriptor type, carried in the high
/// byte of `wValue`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
}
}

impl DescriptorType {
    fn from_code(code: u8) -> Option<Self> {
        DescriptorType::from_u8(code)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DescriptorType::Device => 1,
            DescriptorType::Configuration => 2,
            DescriptorType::String => 3,
            DescriptorType::Interface => 4,
            DescriptorType::Endpoint => 5,
            DescriptorType::DeviceQualifier => 6,
            DescriptorType::OtherSpeedConfiguration => 7,
            DescriptorType::InterfacePower => 8,
        }
    }
}

/// The eight bytes of a SETUP transaction, already split into fields.
/// Wire representation is little-endian; field values here are host-endian.
#[derive(Debug, Copy, Clone)]
pub struct SetupPacket {
    pub request_type: RequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Parses a setup packet from the 8 bytes the driver handed to
    /// `on_setup`. Fails with `ProtocolViolation` if the slice isn't
    /// exactly 8 bytes -- a malformed setup stage, not a recoverable
    /// condition.
    pub fn parse(bytes: &[u8]) -> Result<Self, ErrorCode> {
        if bytes.len() != 8 {
            return Err(ErrorCode::ProtocolViolation);
        }
        Ok(SetupPacket {
            request_type: RequestType(bytes[0]),
            request_code: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Serializes back to the 8-byte wire form. Used by round-trip tests
    /// and by any transition function that needs to reconstruct a packet
    /// (e.g. for logging).
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.request_type.0;
        out[1] = self.request_code;
        out[2..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..6].copy_from_slice(&self.index.to_le_bytes());
        out[6..8].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Decodes `request_code` as a standard request, if `request_type`
    /// claims the `Standard` class and the code is recognized.
    pub fn standard_request(&self) -> Option<StandardRequest> {
        if self.request_type.class() != RequestClass::Standard {
            return None;
        }
        StandardRequest::from_code(self.request_code)
    }

    /// The descriptor type requested by a GET_DESCRIPTOR / SET_DESCRIPTOR,
    /// taken from the high byte of `wValue`.
    pub fn descriptor_type(&self) -> Option<DescriptorType> {
        DescriptorType::from_code((self.value >> 8) as u8)
    }

    /// The descriptor index, the low byte of `wValue`.
    pub fn descriptor_index(&self) -> u8 {
        (self.value & 0xff) as u8
    }

    /// The feature selector for CLEAR_FEATURE / SET_FEATURE, from `wValue`.
    pub fn feature_selector(&self) -> Option<FeatureSelector> {
        FeatureSelector::from_value(self.value)
    }

    /// The interface number for interface-recipient or class/vendor
    /// requests, the low byte of `wIndex`.
    pub fn interface_number(&self) -> u8 {
        (self.index & 0xff) as u8
    }

    /// The endpoint number (excluding direction bit) for endpoint-recipient
    /// requests, the low nibble of `wIndex`.
    pub fn endpoint_number(&self) -> u8 {
        (self.index & 0x0f) as u8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            SetupPacket::parse(&[0u8; 7]),
            Err(ErrorCode::ProtocolViolation)
        );
    }

    #[test]
    fn round_trips_get_descriptor_device() {
        // bmRequestType = 0x80 (device-to-host, standard, device),
        // bRequest = 6 (GET_DESCRIPTOR), wValue = 0x0100 (DEVICE, index 0),
        // wIndex = 0, wLength = 64.
        let wire = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00];
        let pkt = SetupPacket::parse(&wire).unwrap();
        assert_eq!(pkt.request_type.direction(), TransferDirection::DeviceToHost);
        assert_eq!(pkt.request_type.class(), RequestClass::Standard);
        assert_eq!(pkt.request_type.recipient(), Recipient::Device);
        assert_eq!(pkt.standard_request(), Some(StandardRequest::GetDescriptor));
        assert_eq!(pkt.descriptor_type(), Some(DescriptorType::Device));
        assert_eq!(pkt.descriptor_index(), 0);
        assert_eq!(pkt.length, 64);
        assert_eq!(pkt.to_bytes(), wire);
    }

    #[test]
    fn round_trips_set_address() {
        let wire = [0x00, 0x05, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00];
        let pkt = SetupPacket::parse(&wire).unwrap();
        assert_eq!(pkt.standard_request(), Some(StandardRequest::SetAddress));
        assert_eq!(pkt.value, 7);
        assert_eq!(pkt.to_bytes(), wire);
    }

    #[test]
    fn class_request_is_not_a_standard_request() {
        // bmRequestType = 0x21 (host-to-device, class, interface)
        let wire = [0x21, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let pkt = SetupPacket::parse(&wire).unwrap();
        assert_eq!(pkt.request_type.class(), RequestClass::Class);
        assert_eq!(pkt.standard_request(), None);
    }

    #[test]
    fn reserved_request_type_is_reserved_class() {
        let rt = RequestType(0b0110_0000);
        assert_eq!(rt.class(), RequestClass::Reserved);
    }
}
