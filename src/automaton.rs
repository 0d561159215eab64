// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The USB device state automaton.
//!
//! States and transitions are mandated bit-for-bit by chapter 9 of the USB
//! 2.0 specification. `State` has no "invalid" discriminant: a value that
//! would have been the C library's `USB_DEVICE_STATE_INVALID` sentinel is
//! simply not constructible here, so every stored state is trivially a
//! member of the valid set.

use core::sync::atomic::{AtomicU8, Ordering};

/// A state of the USB device automaton.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Attached = 0,
    Powered = 1,
    Default = 2,
    Address = 3,
    Configured = 4,
    SuspendedPower = 5,
    SuspendedDefault = 6,
    SuspendedAddress = 7,
    SuspendedConfigured = 8,
}

impl State {
    const COUNT: usize = 9;

    fn index(self) -> usize {
        self as u8 as usize
    }

    fn from_index(i: u8) -> Self {
        match i {
            0 => State::Attached,
            1 => State::Powered,
            2 => State::Default,
            3 => State::Address,
            4 => State::Configured,
            5 => State::SuspendedPower,
            6 => State::SuspendedDefault,
            7 => State::SuspendedAddress,
            8 => State::SuspendedConfigured,
            _ => unreachable!("State::from_index only called with values produced by State::index"),
        }
    }
}

/// An event delivered by the hardware driver (or a transition function)
/// that may advance the automaton.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    HubConfigured,
    BusInactive,
    BusActive,
    Reset,
    HubReset,
    HubDeconfigured,
    AddressAssigned,
    DeviceConfigured,
    DeviceDeconfigured,
}

/// At most this many distinct (event, next-state) pairs are defined for any
/// one state. Mirrors `MAX_TRANSITION_STATE` in the source automaton table.
const MAX_TRANSITIONS_PER_STATE: usize = 4;

type Row = [Option<(Event, State)>; MAX_TRANSITIONS_PER_STATE];

const fn row(transitions: &[(Event, State)]) -> Row {
    let mut out: Row = [None, None, None, None];
    let mut i = 0;
    while i < transitions.len() {
        out[i] = Some(transitions[i]);
        i += 1;
    }
    out
}

/// The transition table, indexed by `State::index()`.
///
/// `SuspendedPower` accepts a bare `Reset` straight to `Default`, and
/// separately `SuspendedDefault` also accepts `Reset` to `Default`. Both
/// rows are preserved verbatim from the source automaton even though the
/// duplication looks asymmetric (the USB 2.0 spec permits a reset to be
/// observed by the device controller while suspended at any of these
/// sub-states, not only while in `Default`).
static TABLE: [Row; State::COUNT] = [
    // Attached
    row(&[(Event::HubConfigured, State::Powered)]),
    // Powered
    row(&[
        (Event::BusInactive, State::SuspendedPower),
        (Event::HubReset, State::Attached),
        (Event::HubDeconfigured, State::Attached),
        (Event::Reset, State::Default),
    ]),
    // Default
    row(&[
        (Event::AddressAssigned, State::Address),
        (Event::BusInactive, State::SuspendedDefault),
        (Event::Reset, State::Default),
    ]),
    // Address
    row(&[
        (Event::DeviceConfigured, State::Configured),
        (Event::BusInactive, State::SuspendedAddress),
        (Event::Reset, State::Default),
    ]),
    // Configured
    row(&[
        (Event::DeviceDeconfigured, State::Address),
        (Event::BusInactive, State::SuspendedConfigured),
        (Event::Reset, State::Default),
    ]),
    // SuspendedPower
    row(&[
        (Event::BusActive, State::Powered),
        (Event::Reset, State::Default),
    ]),
    // SuspendedDefault
    row(&[
        (Event::BusActive, State::Default),
        (Event::Reset, State::Default),
    ]),
    // SuspendedAddress
    row(&[
        (Event::BusActive, State::Address),
        (Event::Reset, State::Default),
    ]),
    // SuspendedConfigured
    row(&[
        (Event::BusActive, State::Configured),
        (Event::Reset, State::Default),
    ]),
];

/// Returns the target state for `(current, event)`, or `None` when no
/// transition is defined. The Rust-idiomatic replacement for the C
/// automaton's `0xff` sentinel return value.
pub fn next_state(current: State, event: Event) -> Option<State> {
    TABLE[current.index()]
        .iter()
        .find_map(|slot| slot.and_then(|(e, s)| if e == event { Some(s) } else { None }))
}

/// Convenience boolean wrapper around [`next_state`].
pub fn is_valid_transition(current: State, event: Event) -> bool {
    next_state(current, event).is_some()
}

/// Holds the automaton's current state behind the crate's single mutator.
///
/// `state` is private: the only way to change it is [`Automaton::set_state`],
/// and the only callers of `set_state` in this crate are the transition
/// functions in `context.rs` and `dispatcher.rs`. This reproduces, at the
/// type level, the source's metACSL-proved property that only
/// `usbctrl_set_state` writes the state field.
pub struct Automaton {
    state: AtomicU8,
}

impl Automaton {
    /// Constructs an automaton already in `Attached`, the state
    /// `initialize` resets a context to.
    pub const fn new() -> Self {
        Automaton {
            state: AtomicU8::new(State::Attached as u8),
        }
    }

    /// Reads the current state. Safe to call from interrupt context: pairs
    /// with the `Release` store in [`Automaton::set_state`].
    pub fn state(&self) -> State {
        State::from_index(self.state.load(Ordering::Acquire))
    }

    /// The single mutator for the automaton's state.
    ///
    /// Does not itself consult [`next_state`] -- callers are expected to
    /// have done so (or to be one of the few legitimate external resetters,
    /// e.g. a fault handler, forcing a state unconditionally). Ends with a
    /// `Release` store so interrupt-context readers using `Acquire` observe
    /// a coherent value.
    pub fn set_state(&self, new: State) {
        self.state.store(new as u8, Ordering::Release);
    }
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ALL_STATES: [State; State::COUNT] = [
        State::Attached,
        State::Powered,
        State::Default,
        State::Address,
        State::Configured,
        State::SuspendedPower,
        State::SuspendedDefault,
        State::SuspendedAddress,
        State::SuspendedConfigured,
    ];

    const ALL_EVENTS: [Event; 9] = [
        Event::HubConfigured,
        Event::BusInactive,
        Event::BusActive,
        Event::Reset,
        Event::HubReset,
        Event::HubDeconfigured,
        Event::AddressAssigned,
        Event::DeviceConfigured,
        Event::DeviceDeconfigured,
    ];

    /// Property 1: for every reachable (state, event) pair,
    /// `is_valid_transition` agrees with `next_state`.
    #[test]
    fn is_valid_transition_matches_next_state() {
        for &s in &ALL_STATES {
            for &e in &ALL_EVENTS {
                assert_eq!(is_valid_transition(s, e), next_state(s, e).is_some());
            }
        }
    }

    #[test]
    fn hub_configured_moves_attached_to_powered() {
        assert_eq!(
            next_state(State::Attached, Event::HubConfigured),
            Some(State::Powered)
        );
    }

    #[test]
    fn reset_reaches_default_from_every_non_attached_state() {
        for &s in &ALL_STATES {
            if s == State::Attached {
                continue;
            }
            assert_eq!(next_state(s, Event::Reset), Some(State::Default));
        }
    }

    #[test]
    fn attached_rejects_reset() {
        // Attached has no Reset transition: a freshly declared context that
        // never saw hub_configured cannot be reset into Default.
        assert_eq!(next_state(State::Attached, Event::Reset), None);
    }

    #[test]
    fn suspend_resume_round_trips() {
        for (active, suspended) in [
            (State::Powered, State::SuspendedPower),
            (State::Default, State::SuspendedDefault),
            (State::Address, State::SuspendedAddress),
            (State::Configured, State::SuspendedConfigured),
        ] {
            assert_eq!(next_state(active, Event::BusInactive), Some(suspended));
            assert_eq!(next_state(suspended, Event::BusActive), Some(active));
        }
    }

    #[test]
    fn suspended_power_accepts_bare_reset() {
        // Preserved verbatim from the source automaton table alongside
        // SuspendedDefault's Reset row.
        assert_eq!(
            next_state(State::SuspendedPower, Event::Reset),
            Some(State::Default)
        );
    }

    #[test]
    fn set_state_is_observed_after_release_store() {
        let automaton = Automaton::new();
        assert_eq!(automaton.state(), State::Attached);
        automaton.set_state(State::Powered);
        assert_eq!(automaton.state(), State::Powered);
    }
}
