//! Compiled profile data model
//!
//! A [`Profile`] is the fully validated result of compiling one profile
//! file: virtual device identities, feature flags, calibration and the
//! binding table. It is built once by the compiler and never mutated
//! afterwards; reloading a profile replaces the whole snapshot.

use std::fmt;
use std::str::FromStr;

use evdev::{AbsoluteAxisCode, KeyCode, RelativeAxisCode};

use crate::events::EventClass;

// ============================================================================
// Defaults
// ============================================================================

/// Valve vendor ID, used for all virtual devices by default
pub const DEFAULT_VENDOR_ID: u16 = 0x28DE;

/// Default BCD version reported by the virtual devices (1.00)
pub const DEFAULT_VERSION: u16 = 0x0100;

/// Upper bound for every deadzone value
pub const MAX_DEADZONE: f64 = 0.9;

const DEFAULT_PROFILE_NAME: &str = "Unnamed";
const DEFAULT_PROFILE_DESC: &str = "No description";

// ============================================================================
// Virtual devices
// ============================================================================

/// The virtual sub-devices that compiled events are routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualDevice {
    Gamepad,
    Motion,
    Mouse,
}

impl VirtualDevice {
    pub const ALL: [VirtualDevice; 3] = [
        VirtualDevice::Gamepad,
        VirtualDevice::Motion,
        VirtualDevice::Mouse,
    ];

    /// Whether the device can emit events of `class`
    ///
    /// The motion device only reports axes and the mouse has no
    /// absolute axes.
    pub fn supports(self, class: EventClass) -> bool {
        !matches!(
            (self, class),
            (VirtualDevice::Motion, EventClass::Key) | (VirtualDevice::Mouse, EventClass::Absolute)
        )
    }

    /// Keyword used in profile files and `[DeviceInfo]`
    pub fn keyword(self) -> &'static str {
        match self {
            VirtualDevice::Gamepad => "Gamepad",
            VirtualDevice::Motion => "Motion",
            VirtualDevice::Mouse => "Mouse",
        }
    }
}

impl fmt::Display for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Calibration of one absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxis {
    pub code: AbsoluteAxisCode,
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub resolution: i32,
}

/// Identity and enabled events of one virtual sub-device
#[derive(Debug, Clone, PartialEq)]
pub struct SubDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// BCD encoded version
    pub version: u16,
    pub name: String,
    /// Enabled key/button events, in order of first registration
    pub keys: Vec<KeyCode>,
    /// Enabled relative axes, in order of first registration
    pub rel_axes: Vec<RelativeAxisCode>,
    /// Enabled absolute axes, in order of first registration
    pub abs_axes: Vec<AbsAxis>,
}

impl SubDevice {
    fn new(product_id: u16, name: &str) -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id,
            version: DEFAULT_VERSION,
            name: name.to_string(),
            keys: Vec::new(),
            rel_axes: Vec::new(),
            abs_axes: Vec::new(),
        }
    }

    /// Enable a key event; returns false if it was already enabled
    pub fn enable_key(&mut self, code: KeyCode) -> bool {
        if self.keys.contains(&code) {
            return false;
        }
        self.keys.push(code);
        true
    }

    /// Enable a relative axis; returns false if it was already enabled
    pub fn enable_rel(&mut self, code: RelativeAxisCode) -> bool {
        if self.rel_axes.contains(&code) {
            return false;
        }
        self.rel_axes.push(code);
        true
    }

    /// Enable an absolute axis; the first definition of a code wins
    pub fn enable_abs(&mut self, axis: AbsAxis) -> bool {
        if self.abs_axis(axis.code).is_some() {
            return false;
        }
        self.abs_axes.push(axis);
        true
    }

    pub fn abs_axis(&self, code: AbsoluteAxisCode) -> Option<&AbsAxis> {
        self.abs_axes.iter().find(|a| a.code == code)
    }

    /// Version formatted as `major.minor` from its BCD encoding
    pub fn version_string(&self) -> String {
        format!("{:x}.{:02x}", self.version >> 8, self.version & 0xFF)
    }
}

/// The three virtual sub-devices of a profile
#[derive(Debug, Clone, PartialEq)]
pub struct Devices {
    pub gamepad: SubDevice,
    pub motion: SubDevice,
    pub mouse: SubDevice,
}

impl Devices {
    pub fn get(&self, device: VirtualDevice) -> &SubDevice {
        match device {
            VirtualDevice::Gamepad => &self.gamepad,
            VirtualDevice::Motion => &self.motion,
            VirtualDevice::Mouse => &self.mouse,
        }
    }

    pub fn get_mut(&mut self, device: VirtualDevice) -> &mut SubDevice {
        match device {
            VirtualDevice::Gamepad => &mut self.gamepad,
            VirtualDevice::Motion => &mut self.motion,
            VirtualDevice::Mouse => &mut self.mouse,
        }
    }
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            gamepad: SubDevice::new(0x11FF, "deckd Gamepad"),
            motion: SubDevice::new(0x11FE, "deckd Motion Sensors"),
            mouse: SubDevice::new(0x11FD, "deckd Mouse"),
        }
    }
}

// ============================================================================
// Tuning
// ============================================================================

/// Optional virtual devices and processing toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub force_feedback: bool,
    pub motion_device: bool,
    pub mouse_device: bool,
    /// Leave the firmware keyboard/mouse emulation enabled
    pub lizard_mode: bool,
    pub stick_filtering: bool,
    pub trackpad_filtering: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            force_feedback: true,
            motion_device: false,
            mouse_device: true,
            lizard_mode: false,
            stick_filtering: true,
            trackpad_filtering: true,
        }
    }
}

/// A left/right pair of settings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LeftRight<T> {
    pub left: T,
    pub right: T,
}

impl<T: Copy> LeftRight<T> {
    pub const fn both(value: T) -> Self {
        Self {
            left: value,
            right: value,
        }
    }
}

/// Deadzone thresholds, each in `[0, MAX_DEADZONE]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadzones {
    pub stick: LeftRight<f64>,
    pub pad: LeftRight<f64>,
    pub trigger: LeftRight<f64>,
}

impl Default for Deadzones {
    fn default() -> Self {
        Self {
            stick: LeftRight::both(0.1),
            pad: LeftRight::both(0.0),
            trigger: LeftRight::both(0.0),
        }
    }
}

/// Two-component value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Per-touchpad tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadTuning {
    pub sensitivity: Vec2,
    /// Inertial decay rate per axis, in `[0, 1]`
    pub decay: Vec2,
}

impl Default for PadTuning {
    fn default() -> Self {
        Self {
            sensitivity: Vec2::new(1.0, 1.0),
            decay: Vec2::new(0.05, 0.05),
        }
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// The event part of an event binding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventBinding {
    Key(KeyCode),
    /// One half of an absolute axis; `positive` selects the `+` direction
    Abs { axis: AbsoluteAxisCode, positive: bool },
    Rel { axis: RelativeAxisCode, scale: f64 },
}

impl fmt::Display for EventBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventBinding::Key(k) => write!(f, "{:?}", k),
            EventBinding::Abs { axis, positive } => {
                write!(f, "{:?} {}", axis, if *positive { '+' } else { '-' })
            }
            EventBinding::Rel { axis, scale } => write!(f, "{:?} x{}", axis, scale),
        }
    }
}

/// The action attached to one logical input
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Binding {
    #[default]
    None,
    /// Emit an input event on a virtual device
    Event {
        device: VirtualDevice,
        event: EventBinding,
    },
    /// Run a shell command
    Command {
        command: String,
        /// Minimum time between repeats while the input is held
        delay_ms: u32,
        /// Dedup identity, 0 when the command is not tracked
        id: u32,
    },
    /// Switch to another profile
    Profile { name: String },
}

impl Binding {
    pub fn is_none(&self) -> bool {
        matches!(self, Binding::None)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::None => f.write_str("None"),
            Binding::Event { device, event } => write!(f, "{} {}", device, event),
            Binding::Command {
                command,
                delay_ms,
                id,
            } => write!(f, "Command [id {}, delay {}ms] {}", id, delay_ms, command),
            Binding::Profile { name } => write!(f, "Profile {}", name),
        }
    }
}

macro_rules! logical_inputs {
    ($($variant:ident => $key:literal,)*) => {
        /// Every physical control that can carry a binding
        ///
        /// The string form is the key name used in the `[Bindings]` section.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Input {
            $($variant,)*
        }

        impl Input {
            /// All inputs, in table order
            pub const ALL: &'static [Input] = &[$(Input::$variant,)*];

            pub const COUNT: usize = Input::ALL.len();

            /// Key name in the `[Bindings]` section
            pub fn key(self) -> &'static str {
                match self {
                    $(Input::$variant => $key,)*
                }
            }
        }
    };
}

logical_inputs! {
    DpadUp => "DpadUp",
    DpadDown => "DpadDown",
    DpadLeft => "DpadLeft",
    DpadRight => "DpadRight",
    A => "A",
    B => "B",
    X => "X",
    Y => "Y",
    L1 => "L1",
    L2 => "L2",
    L3 => "L3",
    L4 => "L4",
    L5 => "L5",
    R1 => "R1",
    R2 => "R2",
    R3 => "R3",
    R4 => "R4",
    R5 => "R5",
    Menu => "Menu",
    Options => "Options",
    Steam => "Steam",
    QuickAccess => "QuickAccess",
    LTrigg => "LTrigg",
    RTrigg => "RTrigg",
    LStickUp => "LStickUp",
    LStickDown => "LStickDown",
    LStickLeft => "LStickLeft",
    LStickRight => "LStickRight",
    LStickTouch => "LStickTouch",
    LStickForce => "LStickForce",
    RStickUp => "RStickUp",
    RStickDown => "RStickDown",
    RStickLeft => "RStickLeft",
    RStickRight => "RStickRight",
    RStickTouch => "RStickTouch",
    RStickForce => "RStickForce",
    LPadUp => "LPadUp",
    LPadDown => "LPadDown",
    LPadLeft => "LPadLeft",
    LPadRight => "LPadRight",
    LPadRelX => "LPadRelX",
    LPadRelY => "LPadRelY",
    LPadTouch => "LPadTouch",
    LPadPress => "LPadPress",
    LPadForce => "LPadForce",
    LPadPressQuadUp => "LPadPressQuadUp",
    LPadPressQuadDown => "LPadPressQuadDown",
    LPadPressQuadLeft => "LPadPressQuadLeft",
    LPadPressQuadRight => "LPadPressQuadRight",
    LPadPressOrthUp => "LPadPressOrthUp",
    LPadPressOrthDown => "LPadPressOrthDown",
    LPadPressOrthLeft => "LPadPressOrthLeft",
    LPadPressOrthRight => "LPadPressOrthRight",
    LPadPressGrid2x2One => "LPadPressGrid2x2_1",
    LPadPressGrid2x2Two => "LPadPressGrid2x2_2",
    LPadPressGrid2x2Three => "LPadPressGrid2x2_3",
    LPadPressGrid2x2Four => "LPadPressGrid2x2_4",
    LPadPressGrid3x3One => "LPadPressGrid3x3_1",
    LPadPressGrid3x3Two => "LPadPressGrid3x3_2",
    LPadPressGrid3x3Three => "LPadPressGrid3x3_3",
    LPadPressGrid3x3Four => "LPadPressGrid3x3_4",
    LPadPressGrid3x3Five => "LPadPressGrid3x3_5",
    LPadPressGrid3x3Six => "LPadPressGrid3x3_6",
    LPadPressGrid3x3Seven => "LPadPressGrid3x3_7",
    LPadPressGrid3x3Eight => "LPadPressGrid3x3_8",
    LPadPressGrid3x3Nine => "LPadPressGrid3x3_9",
    RPadUp => "RPadUp",
    RPadDown => "RPadDown",
    RPadLeft => "RPadLeft",
    RPadRight => "RPadRight",
    RPadRelX => "RPadRelX",
    RPadRelY => "RPadRelY",
    RPadTouch => "RPadTouch",
    RPadPress => "RPadPress",
    RPadForce => "RPadForce",
    RPadPressQuadUp => "RPadPressQuadUp",
    RPadPressQuadDown => "RPadPressQuadDown",
    RPadPressQuadLeft => "RPadPressQuadLeft",
    RPadPressQuadRight => "RPadPressQuadRight",
    RPadPressOrthUp => "RPadPressOrthUp",
    RPadPressOrthDown => "RPadPressOrthDown",
    RPadPressOrthLeft => "RPadPressOrthLeft",
    RPadPressOrthRight => "RPadPressOrthRight",
    RPadPressGrid2x2One => "RPadPressGrid2x2_1",
    RPadPressGrid2x2Two => "RPadPressGrid2x2_2",
    RPadPressGrid2x2Three => "RPadPressGrid2x2_3",
    RPadPressGrid2x2Four => "RPadPressGrid2x2_4",
    RPadPressGrid3x3One => "RPadPressGrid3x3_1",
    RPadPressGrid3x3Two => "RPadPressGrid3x3_2",
    RPadPressGrid3x3Three => "RPadPressGrid3x3_3",
    RPadPressGrid3x3Four => "RPadPressGrid3x3_4",
    RPadPressGrid3x3Five => "RPadPressGrid3x3_5",
    RPadPressGrid3x3Six => "RPadPressGrid3x3_6",
    RPadPressGrid3x3Seven => "RPadPressGrid3x3_7",
    RPadPressGrid3x3Eight => "RPadPressGrid3x3_8",
    RPadPressGrid3x3Nine => "RPadPressGrid3x3_9",
    AccelXPlus => "AccelXPlus",
    AccelXMinus => "AccelXMinus",
    AccelYPlus => "AccelYPlus",
    AccelYMinus => "AccelYMinus",
    AccelZPlus => "AccelZPlus",
    AccelZMinus => "AccelZMinus",
    RollPlus => "RollPlus",
    RollMinus => "RollMinus",
    PitchPlus => "PitchPlus",
    PitchMinus => "PitchMinus",
    YawPlus => "YawPlus",
    YawMinus => "YawMinus",
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error for an input name that is not in the binding table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownInput(pub String);

impl fmt::Display for UnknownInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown input '{}'", self.0)
    }
}

impl std::error::Error for UnknownInput {}

impl FromStr for Input {
    type Err = UnknownInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Input::ALL
            .iter()
            .copied()
            .find(|i| i.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownInput(s.to_string()))
    }
}

/// One binding slot per [`Input`]
#[derive(Debug, Clone, PartialEq)]
pub struct BindingTable {
    slots: Vec<Binding>,
}

impl Default for BindingTable {
    fn default() -> Self {
        Self {
            slots: vec![Binding::None; Input::COUNT],
        }
    }
}

impl BindingTable {
    pub fn get(&self, input: Input) -> &Binding {
        &self.slots[input as usize]
    }

    pub fn set(&mut self, input: Input, binding: Binding) {
        self.slots[input as usize] = binding;
    }

    /// All slots in table order
    pub fn iter(&self) -> impl Iterator<Item = (Input, &Binding)> {
        Input::ALL.iter().copied().zip(self.slots.iter())
    }

    /// Slots holding something other than `Binding::None`
    pub fn bound(&self) -> impl Iterator<Item = (Input, &Binding)> {
        self.iter().filter(|(_, b)| !b.is_none())
    }
}

// ============================================================================
// Profile
// ============================================================================

/// A complete, validated controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub description: String,
    pub features: Features,
    pub devices: Devices,
    pub deadzones: Deadzones,
    pub touchpads: LeftRight<PadTuning>,
    pub bindings: BindingTable,
}

impl Default for Profile {
    /// The built-in template every compile starts from
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            description: DEFAULT_PROFILE_DESC.to_string(),
            features: Features::default(),
            devices: Devices::default(),
            deadzones: Deadzones::default(),
            touchpads: LeftRight::both(PadTuning::default()),
            bindings: BindingTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_table_size() {
        assert_eq!(Input::COUNT, 108);
        for (index, input) in Input::ALL.iter().enumerate() {
            assert_eq!(*input as usize, index);
        }
    }

    #[test]
    fn test_input_keys_are_unique() {
        let mut keys: Vec<&str> = Input::ALL.iter().map(|i| i.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), Input::COUNT);
    }

    #[test]
    fn test_input_from_str() {
        assert_eq!("QuickAccess".parse::<Input>(), Ok(Input::QuickAccess));
        assert_eq!("rpadpressgrid3x3_9".parse::<Input>(), Ok(Input::RPadPressGrid3x3Nine));
        assert!("Turbo".parse::<Input>().is_err());
    }

    #[test]
    fn test_default_profile() {
        let profile = Profile::default();
        assert_eq!(profile.name, "Unnamed");
        assert_eq!(profile.description, "No description");
        assert_eq!(profile.devices.gamepad.vendor_id, 0x28DE);
        assert_eq!(profile.devices.gamepad.version_string(), "1.00");
        assert_eq!(profile.bindings.bound().count(), 0);
        assert!(profile.devices.gamepad.keys.is_empty());
        assert_eq!(profile.touchpads.left.decay, Vec2::new(0.05, 0.05));
    }

    #[test]
    fn test_enable_key_is_idempotent() {
        let mut dev = Devices::default().gamepad;
        assert!(dev.enable_key(KeyCode::BTN_SOUTH));
        assert!(!dev.enable_key(KeyCode::BTN_SOUTH));
        assert!(dev.enable_key(KeyCode::BTN_EAST));
        assert_eq!(dev.keys, vec![KeyCode::BTN_SOUTH, KeyCode::BTN_EAST]);

        assert!(dev.enable_rel(RelativeAxisCode::REL_X));
        assert!(!dev.enable_rel(RelativeAxisCode::REL_X));
        assert_eq!(dev.rel_axes.len(), 1);
    }

    #[test]
    fn test_enable_abs_first_definition_wins() {
        let mut dev = Devices::default().gamepad;
        let axis = AbsAxis {
            code: AbsoluteAxisCode::ABS_X,
            min: -32768,
            max: 32767,
            fuzz: 16,
            resolution: 0,
        };
        assert!(dev.enable_abs(axis));
        assert!(!dev.enable_abs(AbsAxis { min: 0, max: 1, ..axis }));
        assert_eq!(dev.abs_axes.len(), 1);
        assert_eq!(dev.abs_axis(AbsoluteAxisCode::ABS_X).unwrap().min, -32768);
    }

    #[test]
    fn test_device_capabilities() {
        assert!(VirtualDevice::Gamepad.supports(EventClass::Key));
        assert!(VirtualDevice::Gamepad.supports(EventClass::Absolute));
        assert!(!VirtualDevice::Motion.supports(EventClass::Key));
        assert!(VirtualDevice::Motion.supports(EventClass::Relative));
        assert!(!VirtualDevice::Mouse.supports(EventClass::Absolute));
        assert!(VirtualDevice::Mouse.supports(EventClass::Key));
    }

    #[test]
    fn test_binding_table_set_get() {
        let mut table = BindingTable::default();
        table.set(
            Input::A,
            Binding::Event {
                device: VirtualDevice::Gamepad,
                event: EventBinding::Key(KeyCode::BTN_SOUTH),
            },
        );
        assert!(!table.get(Input::A).is_none());
        assert!(table.get(Input::B).is_none());
        let bound: Vec<Input> = table.bound().map(|(i, _)| i).collect();
        assert_eq!(bound, vec![Input::A]);
    }

    #[test]
    fn test_binding_display() {
        let b = Binding::Command {
            command: "steam -quickaccess".to_string(),
            delay_ms: 0,
            id: 3,
        };
        assert_eq!(format!("{}", b), "Command [id 3, delay 0ms] steam -quickaccess");
        assert_eq!(format!("{}", Binding::None), "None");
    }
}
