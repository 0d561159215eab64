// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The standard-request dispatcher: classifies an incoming SETUP packet,
//! drives the EP0 three-stage transaction model, and updates the
//! automaton. SS 4.3 of the distilled spec.

use crate::automaton::{Event, State};
use crate::context::DeviceContext;
use crate::descriptors::{
    build_configuration_descriptor, ConfigurationAttributes, Descriptor, DeviceDescriptor,
    LanguagesDescriptor, StringDescriptor, EP0_MAX_PACKET_SIZE, SUPPORTED_LANGUAGES,
};
use crate::hil::{DeviceHooks, RequestOutcome};
use crate::setup::{DescriptorType, FeatureSelector, Recipient, RequestClass, SetupPacket, StandardRequest, TransferDirection};

/// Largest configuration-descriptor blob this crate assembles on the
/// stack before handing it to the driver, sized for the worst case allowed
/// by `MAX_INTERFACES_PER_CONFIGURATION` / `MAX_ENDPOINTS_PER_INTERFACE`:
/// `9 + 4 * (9 + 8 * 7) = 269` bytes, rounded up.
const EP0_TX_SCRATCH_SIZE: usize = 272;

/// Entry point called by [`DeviceContext::on_setup`]. Never returns an
/// error: every failure path is a protocol stall on EP0, per SS 4.3.
pub(crate) fn dispatch<H: DeviceHooks>(ctx: &DeviceContext<H>, packet: &SetupPacket) {
    let Some(dev_id) = ctx.dev_id_or_stall() else {
        return;
    };

    match packet.request_type.class() {
        RequestClass::Standard => handle_standard(ctx, dev_id, packet),
        RequestClass::Class | RequestClass::Vendor => handle_class_or_vendor(ctx, dev_id, packet),
        RequestClass::Reserved => ctx.stall_ep0(),
    }
}

fn handle_class_or_vendor<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    let interface_number = packet.interface_number();
    let Some(handler) = ctx.find_interface_handler(interface_number) else {
        ctx.stall_ep0();
        return;
    };

    match handler.setup_request(packet) {
        RequestOutcome::HandledWithData => {
            // The interface already produced/queued its own response data;
            // the core's remaining job is the control-transfer bookkeeping.
            if packet.request_type.direction() == TransferDirection::DeviceToHost {
                ctx.arm_status_out(dev_id);
            } else {
                ctx.send_status_in(dev_id);
            }
        }
        RequestOutcome::HandledNoData => ctx.send_status_in(dev_id),
        RequestOutcome::Unsupported => ctx.stall_ep0(),
    }
}

fn handle_standard<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    let Some(request) = packet.standard_request() else {
        ctx.stall_ep0();
        return;
    };

    match request {
        StandardRequest::GetStatus => get_status(ctx, dev_id, packet),
        StandardRequest::ClearFeature => set_feature(ctx, dev_id, packet, false),
        StandardRequest::SetFeature => set_feature(ctx, dev_id, packet, true),
        StandardRequest::SetAddress => set_address(ctx, dev_id, packet),
        StandardRequest::GetDescriptor => get_descriptor(ctx, dev_id, packet),
        StandardRequest::SetDescriptor => ctx.stall_ep0(),
        StandardRequest::GetConfiguration => {
            let value = [ctx.current_configuration()];
            respond_in(ctx, dev_id, packet, &value);
        }
        StandardRequest::SetConfiguration => set_configuration(ctx, dev_id, packet),
        StandardRequest::GetInterface => {
            // No alternate settings in this core: always report 0.
            respond_in(ctx, dev_id, packet, &[0u8]);
        }
        StandardRequest::SetInterface => {
            if packet.value == 0 {
                ctx.send_status_in(dev_id);
            } else {
                ctx.stall_ep0();
            }
        }
        StandardRequest::SynchFrame => ctx.stall_ep0(),
    }
}

/// Writes `data` (truncated to `packet.length`) to the host in chunks no
/// larger than `EP0_MAX_PACKET_SIZE`, per SS 4.3's "IN data stage" rule,
/// then arms the follow-up zero-length OUT status stage.
fn respond_in<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket, data: &[u8]) {
    let len = data.len().min(packet.length as usize);
    let payload = &data[..len];
    let chunk_size = EP0_MAX_PACKET_SIZE as usize;
    if payload.is_empty() {
        ctx.transmit_ep0(dev_id, payload);
    } else {
        for chunk in payload.chunks(chunk_size) {
            ctx.transmit_ep0(dev_id, chunk);
        }
    }
    ctx.arm_status_out(dev_id);
}

fn get_status<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    let status: u16 = match packet.request_type.recipient() {
        Recipient::Device => {
            let self_powered = ctx.self_powered() as u16;
            let remote_wakeup = (ctx.remote_wakeup() as u16) << 1;
            self_powered | remote_wakeup
        }
        Recipient::Endpoint => {
            let number = packet.endpoint_number();
            ctx.endpoint_is_halted(dev_id, number) as u16
        }
        Recipient::Interface => 0,
        Recipient::Other | Recipient::Reserved => {
            ctx.stall_ep0();
            return;
        }
    };
    respond_in(ctx, dev_id, packet, &status.to_le_bytes());
}

fn set_feature<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket, enable: bool) {
    let Some(selector) = packet.feature_selector() else {
        ctx.stall_ep0();
        return;
    };

    let ok = match (packet.request_type.recipient(), selector) {
        (Recipient::Endpoint, FeatureSelector::EndpointHalt) => {
            let number = packet.endpoint_number();
            ctx.set_endpoint_halt(dev_id, number, enable).is_ok()
        }
        (Recipient::Device, FeatureSelector::DeviceRemoteWakeup) => {
            ctx.set_remote_wakeup(enable);
            true
        }
        _ => false,
    };

    if ok {
        ctx.send_status_in(dev_id);
    } else {
        ctx.stall_ep0();
    }
}

fn set_address<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    if packet.value > 127 {
        ctx.stall_ep0();
        return;
    }
    if !matches!(ctx.state(), State::Default | State::Address) {
        ctx.stall_ep0();
        return;
    }
    ctx.schedule_address(packet.value as u8);
    // The address itself is programmed (and the automaton transitioned) in
    // `DeviceContext::on_in_complete` once this status stage finishes.
    ctx.send_status_in(dev_id);
}

fn get_descriptor<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    let Some(descriptor_type) = packet.descriptor_type() else {
        ctx.stall_ep0();
        return;
    };

    match descriptor_type {
        DescriptorType::Device => {
            let identity = ctx.identity();
            let descriptor = ctx.with_registry(|registry| DeviceDescriptor::for_registry(registry, identity));
            let mut buf = [0u8; 18];
            let len = descriptor.write_to(&mut buf);
            respond_in(ctx, dev_id, packet, &buf[..len]);
        }
        DescriptorType::Configuration => {
            let index = packet.descriptor_index() as usize;
            let mut buf = [0u8; EP0_TX_SCRATCH_SIZE];
            let len = ctx.with_registry(|registry| {
                build_configuration_descriptor(
                    registry,
                    index,
                    (index + 1) as u8,
                    ConfigurationAttributes {
                        self_powered: ctx.self_powered(),
                        remote_wakeup: ctx.remote_wakeup(),
                    },
                    50,
                    &mut buf,
                )
            });
            if len == 0 {
                ctx.stall_ep0();
                return;
            }
            respond_in(ctx, dev_id, packet, &buf[..len]);
        }
        DescriptorType::String => {
            let index = packet.descriptor_index();
            if index == 0 {
                let descriptor = LanguagesDescriptor {
                    languages: &SUPPORTED_LANGUAGES,
                };
                let mut buf = [0u8; 4];
                let len = descriptor.write_to(&mut buf);
                respond_in(ctx, dev_id, packet, &buf[..len]);
                return;
            }
            let Some(strings) = ctx.strings() else {
                ctx.stall_ep0();
                return;
            };
            let Some(string) = strings.get((index - 1) as usize) else {
                ctx.stall_ep0();
                return;
            };
            let descriptor = StringDescriptor { string };
            let mut buf = [0u8; 64];
            let len = descriptor.write_to(&mut buf);
            if len == 0 {
                ctx.stall_ep0();
                return;
            }
            respond_in(ctx, dev_id, packet, &buf[..len]);
        }
        DescriptorType::DeviceQualifier
        | DescriptorType::OtherSpeedConfiguration
        | DescriptorType::Interface
        | DescriptorType::Endpoint
        | DescriptorType::InterfacePower => ctx.stall_ep0(),
    }
}

fn set_configuration<H: DeviceHooks>(ctx: &DeviceContext<H>, dev_id: u32, packet: &SetupPacket) {
    let value = (packet.value & 0xff) as u8;

    if value == 0 {
        if ctx.state() != State::Configured {
            ctx.stall_ep0();
            return;
        }
        let current = ctx.current_configuration();
        if current > 0 {
            ctx.configure_endpoints_for(dev_id, current as usize - 1, false);
        }
        if !ctx.automaton_apply(Event::DeviceDeconfigured) {
            ctx.stall_ep0();
            return;
        }
        ctx.set_current_configuration(0);
        ctx.hooks().configuration_set();
        ctx.send_status_in(dev_id);
        return;
    }

    let config_count = ctx.with_registry(|registry| registry.configuration_count);
    if ctx.state() != State::Address || value as usize > config_count {
        ctx.stall_ep0();
        return;
    }

    if !ctx.automaton_apply(Event::DeviceConfigured) {
        ctx.stall_ep0();
        return;
    }
    ctx.set_current_configuration(value);
    ctx.configure_endpoints_for(dev_id, value as usize - 1, true);
    ctx.hooks().configuration_set();
    ctx.send_status_in(dev_id);
}
