// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The process-wide table of device contexts.
//!
//! A board normally declares a single USB device, but the source library
//! (and this crate) size the table for more than one physical controller so
//! a board with two USB IPs does not need a second copy of the control
//! plane.

use tock_cells::optional_cell::OptionalCell;

use crate::context::DeviceContext;
use crate::error::ErrorCode;
use crate::hil::DeviceHooks;

/// Maximum number of physical USB devices the registry can track at once.
/// Mirrors `CONFIG_USBCTRL_MAX_CTX` in the source.
pub const MAX_CONTEXTS: usize = 4;

/// Fixed-size table resolving a hardware `dev_id` to its [`DeviceContext`].
///
/// Slots are handed out by [`ContextRegistry::register`] and never reclaimed
/// individually; a context's slot is only vacated by [`DeviceContext::release`]
/// going through [`ContextRegistry::unregister`].
pub struct ContextRegistry<'a, H: 'a + DeviceHooks> {
    slots: [OptionalCell<&'a DeviceContext<'a, H>>; MAX_CONTEXTS],
}

impl<'a, H: 'a + DeviceHooks> ContextRegistry<'a, H> {
    pub const fn new() -> Self {
        ContextRegistry {
            slots: [
                OptionalCell::empty(),
                OptionalCell::empty(),
                OptionalCell::empty(),
                OptionalCell::empty(),
            ],
        }
    }

    /// Registers a context that has already obtained a `dev_id` from the
    /// driver. Fails with `NoMoreSlots` once [`MAX_CONTEXTS`] contexts are
    /// already tracked.
    pub fn register(&self, ctx: &'a DeviceContext<'a, H>) -> Result<(), ErrorCode> {
        for slot in self.slots.iter() {
            if slot.is_none() {
                slot.set(ctx);
                return Ok(());
            }
        }
        Err(ErrorCode::NoMoreSlots)
    }

    /// Drops the slot holding the context with this `dev_id`, if any.
    pub fn unregister(&self, dev_id: u32) {
        for slot in self.slots.iter() {
            let matches = slot.map_or(false, |ctx| ctx.dev_id() == Some(dev_id));
            if matches {
                slot.clear();
            }
        }
    }

    /// Resolves a hardware device id to its context, as the event-glue
    /// entry points do on every driver callback.
    pub fn find(&self, dev_id: u32) -> Option<&'a DeviceContext<'a, H>> {
        self.slots.iter().find_map(|slot| {
            slot.map(|ctx| *ctx)
                .filter(|ctx| ctx.dev_id() == Some(dev_id))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a, H: 'a + DeviceHooks> Default for ContextRegistry<'a, H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hil::UsbHardware;
    use crate::interface::{EndpointDirection, EndpointType};

    struct NullHooks;
    impl DeviceHooks for NullHooks {
        fn configuration_set(&self) {}
        fn reset_received(&self) {}
    }

    struct NullDriver;
    impl UsbHardware for NullDriver {
        fn declare_device(&self) -> Result<u32, ErrorCode> {
            Ok(1)
        }
        fn release_device(&self, _dev_id: u32) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn map(&self, _dev_id: u32) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn unmap(&self, _dev_id: u32) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn enable_device(&self, _dev_id: u32) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn configure_endpoint(
            &self,
            _dev_id: u32,
            _number: u8,
            _ep_type: EndpointType,
            _direction: EndpointDirection,
            _max_packet_size: u16,
        ) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn enable_endpoint(&self, _dev_id: u32, _number: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn disable_endpoint(&self, _dev_id: u32, _number: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn stall_endpoint(&self, _dev_id: u32, _number: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn clear_stall_endpoint(&self, _dev_id: u32, _number: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn is_endpoint_stalled(&self, _dev_id: u32, _number: u8) -> bool {
            false
        }
        fn set_address(&self, _dev_id: u32, _address: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn transmit_in(&self, _dev_id: u32, _endpoint: u8, _data: &[u8]) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn arm_out(&self, _dev_id: u32, _endpoint: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
        fn send_zero_length_packet(&self, _dev_id: u32, _endpoint: u8) -> Result<(), ErrorCode> {
            Ok(())
        }
    }

    #[test]
    fn registers_and_finds_a_context() {
        static DRIVER: NullDriver = NullDriver;
        let ctx = DeviceContext::new(&DRIVER, NullHooks, crate::context::test_identity());
        ctx.declare().unwrap();
        ctx.initialize();

        let registry: ContextRegistry<NullHooks> = ContextRegistry::new();
        registry.register(&ctx).unwrap();

        let dev_id = ctx.dev_id().unwrap();
        assert!(registry.find(dev_id).is_some());
    }

    #[test]
    fn rejects_registration_past_capacity() {
        static DRIVER: NullDriver = NullDriver;
        let contexts: [DeviceContext<NullHooks>; MAX_CONTEXTS] = core::array::from_fn(|_| {
            let ctx = DeviceContext::new(&DRIVER, NullHooks, crate::context::test_identity());
            ctx.declare().unwrap();
            ctx
        });
        let registry: ContextRegistry<NullHooks> = ContextRegistry::new();
        for ctx in &contexts {
            registry.register(ctx).unwrap();
        }

        let one_too_many = DeviceContext::new(&DRIVER, NullHooks, crate::context::test_identity());
        one_too_many.declare().unwrap();
        assert_eq!(registry.register(&one_too_many), Err(ErrorCode::NoMoreSlots));
    }
}
