// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Thin wrapper over `defmt`, compiled away entirely when the `defmt-log`
//! feature is off. Kept as plain functions rather than macros so call
//! sites don't need their own `#[cfg]` attributes.

#[cfg(feature = "defmt-log")]
pub(crate) fn protocol_stall(dev_id: u32, endpoint: u8) {
    defmt::trace!("usbctrl: protocol stall dev={=u32} ep={=u8}", dev_id, endpoint);
}

#[cfg(not(feature = "defmt-log"))]
pub(crate) fn protocol_stall(_dev_id: u32, _endpoint: u8) {}

#[cfg(feature = "defmt-log")]
pub(crate) fn driver_error(operation: &str) {
    defmt::warn!("usbctrl: driver refused {=str}", operation);
}

#[cfg(not(feature = "defmt-log"))]
pub(crate) fn driver_error(_operation: &str) {}
