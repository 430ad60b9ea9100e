//! Input event vocabulary
//!
//! Maps the event names used in profiles (`BTN_SOUTH`, `ABS_HAT0X`,
//! `REL_WHEEL`, ...) to typed evdev codes. The compiler only depends on the
//! [`EventResolver`] trait; [`EvdevNames`] resolves against the kernel name
//! tables shipped with the `evdev` crate.

use evdev::{AbsoluteAxisCode, KeyCode, RelativeAxisCode};

/// Kind of low-level input event a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// EV_KEY (keys and buttons)
    Key,
    /// EV_ABS
    Absolute,
    /// EV_REL
    Relative,
}

/// A resolved event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    Key(KeyCode),
    Abs(AbsoluteAxisCode),
    Rel(RelativeAxisCode),
}

impl EventCode {
    pub fn class(&self) -> EventClass {
        match self {
            EventCode::Key(_) => EventClass::Key,
            EventCode::Abs(_) => EventClass::Absolute,
            EventCode::Rel(_) => EventClass::Relative,
        }
    }

    /// Raw kernel event code
    pub fn code(&self) -> u16 {
        match self {
            EventCode::Key(k) => k.code(),
            EventCode::Abs(a) => a.0,
            EventCode::Rel(r) => r.0,
        }
    }
}

/// Resolves a human-readable event name to its class and code
pub trait EventResolver {
    /// Returns `None` when the name is not part of the vocabulary
    fn resolve(&self, name: &str) -> Option<EventCode>;
}

impl<F> EventResolver for F
where
    F: Fn(&str) -> Option<EventCode>,
{
    fn resolve(&self, name: &str) -> Option<EventCode> {
        self(name)
    }
}

/// Resolver backed by the evdev crate's name tables
///
/// Lookups are case-insensitive. `KEY_*` and `BTN_*` names resolve to keys,
/// `ABS_*` to absolute axes and `REL_*` to relative axes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvdevNames;

impl EventResolver for EvdevNames {
    fn resolve(&self, name: &str) -> Option<EventCode> {
        let name = name.trim().to_ascii_uppercase();

        if name.starts_with("ABS_") {
            name.parse::<AbsoluteAxisCode>().ok().map(EventCode::Abs)
        } else if name.starts_with("REL_") {
            name.parse::<RelativeAxisCode>().ok().map(EventCode::Rel)
        } else if name.starts_with("KEY_") || name.starts_with("BTN_") {
            name.parse::<KeyCode>().ok().map(EventCode::Key)
        } else {
            None
        }
    }
}
