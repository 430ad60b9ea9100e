//! Profile compiler
//!
//! Turns a profile document into a [`Profile`]. Compilation always starts
//! from `Profile::default()` and overlays whatever validates. A malformed
//! key is logged and skipped, leaving the template value in place; only a
//! missing file or a structurally broken document fails the whole compile.
//!
//! ## Sections
//!
//! | Section         | Keys                                          |
//! |-----------------|-----------------------------------------------|
//! | `Profile`       | `Name`, `Description`                         |
//! | `Features`      | `ForceFeedback`, `MotionDevice`, ...          |
//! | `DeviceInfo`    | `Gamepad`, `Motion`, `Mouse`                  |
//! | `Deadzones`     | `LStick`, `RStick`, `LPad`, `RPad`, `LTrigg`, `RTrigg` |
//! | `GamepadAxes`   | any `ABS_*` name: `min max [fuzz [res]]`      |
//! | `MotionAxes`    | same as `GamepadAxes`                         |
//! | `Touchpads`     | `LPadSensitivity`, `LPadDecay`, ...           |
//! | `Bindings`      | one key per [`Input`]                         |
//!
//! Axis sections are read before `Bindings` so that absolute axis bindings
//! can only target axes that are actually enabled.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::events::{EvdevNames, EventCode, EventResolver};
use crate::ini::{Ini, IniError, Values};
use crate::profile::{
    AbsAxis, Binding, Devices, EventBinding, Input, Profile, SubDevice, Vec2, VirtualDevice,
    MAX_DEADZONE,
};

/// Next dedup identity for "wait for exit" command bindings
///
/// Shared by every compiler in the process and never reset, so identities
/// stay unique across reloads for the lifetime of the daemon.
static NEXT_COMMAND_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh non-zero command identity
pub fn next_command_id() -> u32 {
    let prev = NEXT_COMMAND_ID.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
        Some(advance_command_id(id))
    });
    // The closure never returns None
    match prev {
        Ok(id) | Err(id) => id,
    }
}

/// Successor of `id`, wrapping past 0 which means "untracked"
fn advance_command_id(id: u32) -> u32 {
    id.checked_add(1).unwrap_or(1)
}

/// Compiles profile documents against an event vocabulary
#[derive(Debug, Clone, Default)]
pub struct ProfileCompiler<R = EvdevNames> {
    resolver: R,
}

impl ProfileCompiler<EvdevNames> {
    /// Compiler using the evdev name tables
    pub fn new() -> Self {
        Self {
            resolver: EvdevNames,
        }
    }
}

impl<R: EventResolver> ProfileCompiler<R> {
    pub fn with_resolver(resolver: R) -> Self {
        Self { resolver }
    }

    /// Compile a profile file
    pub fn compile<P: AsRef<Path>>(&self, path: P) -> Result<Profile, CompileError> {
        let path = path.as_ref();

        if !path.exists() {
            debug!(path = %path.display(), "Profile file not found");
            return Err(CompileError::NotFound(path.to_path_buf()));
        }

        debug!(path = %path.display(), "Loading profile");
        let ini = Ini::load(path).map_err(|e| CompileError::Source {
            path: Some(path.to_path_buf()),
            source: e,
        })?;

        Ok(self.compile_ini(&ini))
    }

    /// Compile profile text held in memory
    pub fn compile_str(&self, text: &str) -> Result<Profile, CompileError> {
        let ini = Ini::parse(text).map_err(|e| CompileError::Source {
            path: None,
            source: e,
        })?;
        Ok(self.compile_ini(&ini))
    }

    /// Overlay an already parsed document onto the default template
    pub fn compile_ini(&self, ini: &Ini) -> Profile {
        let mut prof = Profile::default();

        if ini.has_section("Profile") {
            debug!("Reading [Profile] section...");
            if let Some(name) = read_text(ini, "Profile", "Name") {
                prof.name = name;
            }
            if let Some(desc) = read_text(ini, "Profile", "Description") {
                prof.description = desc;
            }
        }

        if ini.has_section("Features") {
            debug!("Reading [Features] section...");
            let f = &mut prof.features;
            read_feature(ini, "ForceFeedback", &mut f.force_feedback);
            read_feature(ini, "MotionDevice", &mut f.motion_device);
            read_feature(ini, "MouseDevice", &mut f.mouse_device);
            read_feature(ini, "LizardMode", &mut f.lizard_mode);
            read_feature(ini, "StickFiltering", &mut f.stick_filtering);
            read_feature(ini, "TrackpadFiltering", &mut f.trackpad_filtering);
        }

        if ini.has_section("DeviceInfo") {
            debug!("Reading [DeviceInfo] section...");
            for device in VirtualDevice::ALL {
                read_device_info(ini, device, prof.devices.get_mut(device));
            }
        }

        if ini.has_section("Deadzones") {
            debug!("Reading [Deadzones] section...");
            let dz = &mut prof.deadzones;
            read_deadzone(ini, "LStick", &mut dz.stick.left);
            read_deadzone(ini, "RStick", &mut dz.stick.right);
            read_deadzone(ini, "LPad", &mut dz.pad.left);
            read_deadzone(ini, "RPad", &mut dz.pad.right);
            read_deadzone(ini, "LTrigg", &mut dz.trigger.left);
            read_deadzone(ini, "RTrigg", &mut dz.trigger.right);
        }

        for (section, device) in [
            ("GamepadAxes", VirtualDevice::Gamepad),
            ("MotionAxes", VirtualDevice::Motion),
        ] {
            if ini.has_section(section) {
                debug!("Reading [{}] section...", section);
                self.read_axes(ini, section, prof.devices.get_mut(device));
            }
        }

        if ini.has_section("Touchpads") {
            debug!("Reading [Touchpads] section...");
            let pads = &mut prof.touchpads;
            read_pad_sensitivity(ini, "LPadSensitivity", &mut pads.left.sensitivity);
            read_pad_sensitivity(ini, "RPadSensitivity", &mut pads.right.sensitivity);
            read_pad_decay(ini, "LPadDecay", &mut pads.left.decay);
            read_pad_decay(ini, "RPadDecay", &mut pads.right.decay);
        }

        if ini.has_section("Bindings") {
            debug!("Reading [Bindings] section...");
            for &input in Input::ALL {
                let binding = self.resolve_binding(ini, input, &mut prof.devices);
                prof.bindings.set(input, binding);
            }
        }

        prof
    }

    /// Enable every axis listed in a `GamepadAxes`/`MotionAxes` section
    fn read_axes(&self, ini: &Ini, section: &str, device: &mut SubDevice) {
        for key in ini.keys(section) {
            let axis = match self.resolver.resolve(key) {
                Some(EventCode::Abs(axis)) => axis,
                Some(_) => {
                    warn!(section, key, "Format error: not an absolute axis. Ignoring.");
                    continue;
                }
                None => {
                    warn!(section, key, "Failed to enable axis: event name not found.");
                    continue;
                }
            };

            let Some(val) = ini.get(section, key) else {
                continue;
            };
            let Some(axis) = parse_axis_range(key, val, axis) else {
                continue;
            };

            if device.enable_abs(axis) {
                debug!(
                    section,
                    key,
                    min = axis.min,
                    max = axis.max,
                    fuzz = axis.fuzz,
                    res = axis.resolution,
                    "Axis enabled"
                );
            } else {
                debug!(section, key, "Axis already enabled. Ignoring duplicate.");
            }
        }
    }

    /// Resolve the `[Bindings]` entry of one input
    ///
    /// Any failure leaves the slot as `Binding::None`.
    fn resolve_binding(&self, ini: &Ini, input: Input, devices: &mut Devices) -> Binding {
        let key = input.key();
        let Some(val) = ini.get("Bindings", key) else {
            return Binding::None;
        };
        let Some(kind) = val.string(0) else {
            warn!(key, "Format error: binding has no values set. Ignoring.");
            return Binding::None;
        };

        let binding = match kind.to_ascii_uppercase().as_str() {
            "NONE" => return Binding::None,
            "GAMEPAD" => self.event_binding(key, val, VirtualDevice::Gamepad, devices),
            "MOTION" => self.event_binding(key, val, VirtualDevice::Motion, devices),
            "MOUSE" => self.event_binding(key, val, VirtualDevice::Mouse, devices),
            "COMMAND" => command_binding(key, val),
            "PROFILE" => profile_binding(key, val),
            _ => {
                warn!(key, kind, "Format error: unknown binding type. Ignoring.");
                None
            }
        };

        match binding {
            Some(binding) => {
                debug!(key, %binding, "Added binding");
                binding
            }
            None => Binding::None,
        }
    }

    fn event_binding(
        &self,
        key: &str,
        val: &Values,
        device: VirtualDevice,
        devices: &mut Devices,
    ) -> Option<Binding> {
        if val.len() < 2 {
            warn!(key, "Format error: event binding expects at least 2 values. Ignoring.");
            return None;
        }

        let name = val.string(1)?.to_ascii_uppercase();
        let Some(code) = self.resolver.resolve(&name) else {
            warn!(key, event = %name, "Format error: unknown event name. Ignoring.");
            return None;
        };

        if !device.supports(code.class()) {
            warn!(
                key,
                event = %name,
                %device,
                "Format error: event type is not supported on this device. Ignoring."
            );
            return None;
        }

        let sub = devices.get_mut(device);
        let event = match code {
            EventCode::Key(k) => {
                sub.enable_key(k);
                EventBinding::Key(k)
            }
            EventCode::Abs(axis) => {
                let positive = match val.string(2) {
                    Some("+") => true,
                    Some("-") => false,
                    _ => {
                        warn!(
                            key,
                            "Format error: expects the 3rd value to be a +/- direction. Ignoring."
                        );
                        return None;
                    }
                };
                // Axes are enabled from [GamepadAxes]/[MotionAxes], never here
                if sub.abs_axis(axis).is_none() {
                    warn!(
                        key,
                        event = %name,
                        %device,
                        "Absolute axis is not enabled for this device. Ignoring."
                    );
                    return None;
                }
                EventBinding::Abs { axis, positive }
            }
            EventCode::Rel(axis) => {
                let scale = if val.len() > 2 {
                    let Some(scale) = val.double(2) else {
                        warn!(key, "Format error: scale must be a number. Ignoring.");
                        return None;
                    };
                    scale
                } else {
                    1.0
                };
                if scale == 0.0 {
                    warn!(key, "Binding has a scale value of 0. This will make the axis unusable.");
                }
                sub.enable_rel(axis);
                EventBinding::Rel { axis, scale }
            }
        };

        Some(Binding::Event { device, event })
    }
}

fn command_binding(key: &str, val: &Values) -> Option<Binding> {
    if val.len() < 4 {
        warn!(key, "Format error: command binding expects 4 values. Ignoring.");
        return None;
    }

    let Some(wait_for_exit) = val.boolean(1) else {
        warn!(key, "Format error: wait_for_exit must be true or false. Ignoring.");
        return None;
    };

    let Some(delay) = val.int(2) else {
        warn!(key, "Format error: repeat_delay_ms must be an integer. Ignoring.");
        return None;
    };
    let delay_ms = u32::try_from(delay).unwrap_or_else(|_| {
        warn!(key, delay, "Format error: repeat_delay_ms must be 0 or greater. Using 0.");
        0
    });

    let command = val.rest(3).unwrap_or_default().trim();
    if command.is_empty() {
        warn!(key, "Format error: binding has no command to execute. Ignoring.");
        return None;
    }

    // Only allocated once the binding is known to be valid
    let id = if wait_for_exit { next_command_id() } else { 0 };

    Some(Binding::Command {
        command: command.to_string(),
        delay_ms,
        id,
    })
}

fn profile_binding(key: &str, val: &Values) -> Option<Binding> {
    if val.len() < 2 {
        warn!(key, "Format error: profile binding expects 2 values. Ignoring.");
        return None;
    }

    let name = val.rest(1).unwrap_or_default().trim();
    if name.is_empty() {
        warn!(key, "Format error: profile binding has no profile name. Ignoring.");
        return None;
    }

    Some(Binding::Profile {
        name: name.to_string(),
    })
}

// ============================================================================
// Field helpers
// ============================================================================

/// Rest-of-line text value
fn read_text(ini: &Ini, section: &str, key: &str) -> Option<String> {
    let val = ini.get(section, key)?;
    match val.rest(0) {
        Some(text) => {
            debug!(section, key, value = text, "Value set");
            Some(text.to_string())
        }
        None => {
            warn!(section, key, "Format error: expects a value. Ignoring.");
            None
        }
    }
}

fn read_feature(ini: &Ini, key: &str, slot: &mut bool) {
    let Some(val) = ini.get("Features", key) else {
        return;
    };

    match (val.len(), val.boolean(0)) {
        (1, Some(enabled)) => {
            *slot = enabled;
            debug!(key, enabled, "Feature set");
        }
        _ => warn!(key, "Format error: expects 1 true/false value. Ignoring."),
    }
}

fn read_device_info(ini: &Ini, device: VirtualDevice, sub: &mut SubDevice) {
    let key = device.keyword();
    let Some(val) = ini.get("DeviceInfo", key) else {
        debug!(key, "No device info. Using defaults.");
        return;
    };

    if val.len() != 4 {
        warn!(key, "Format error: device info expects 4 values. Ignoring key and using defaults.");
        return;
    }

    let (Some(vid), Some(pid), Some(ver), Some(name)) =
        (val.hex_u16(0), val.hex_u16(1), val.hex_u16(2), val.string(3))
    else {
        warn!(
            key,
            "Format error: device info contains an invalid hexadecimal value. Ignoring key and using defaults."
        );
        return;
    };

    sub.vendor_id = vid;
    sub.product_id = pid;
    sub.version = ver;
    sub.name = name.to_string();

    let vid = format!("0x{:04X}", sub.vendor_id);
    let pid = format!("0x{:04X}", sub.product_id);
    debug!(
        key,
        name = %sub.name,
        vid = %vid,
        pid = %pid,
        version = %sub.version_string(),
        "Device info set"
    );
}

fn read_deadzone(ini: &Ini, key: &str, slot: &mut f64) {
    let Some(val) = ini.get("Deadzones", key) else {
        return;
    };

    match (val.len(), val.double(0)) {
        (1, Some(v)) => {
            *slot = v.clamp(0.0, MAX_DEADZONE);
            debug!(key, deadzone = *slot, "Deadzone set");
        }
        _ => warn!(key, "Format error: expects 1 numeric value. Ignoring."),
    }
}

fn parse_axis_range(
    key: &str,
    val: &Values,
    code: evdev::AbsoluteAxisCode,
) -> Option<AbsAxis> {
    if !(2..=4).contains(&val.len()) {
        warn!(key, "Format error: axis range expects 2 to 4 integer values. Ignoring.");
        return None;
    }

    let ints: Option<Vec<i32>> = (0..val.len()).map(|i| val.int(i)).collect();
    let Some(ints) = ints else {
        warn!(key, "Format error: axis range values must be integers. Ignoring.");
        return None;
    };

    let (min, max) = (ints[0], ints[1]);
    if min == max {
        warn!(key, min, max, "Format error: axis has an invalid range. Ignoring.");
        return None;
    }

    Some(AbsAxis {
        code,
        min,
        max,
        fuzz: ints.get(2).copied().unwrap_or(0),
        resolution: ints.get(3).copied().unwrap_or(0),
    })
}

fn read_pad_pair(ini: &Ini, key: &str) -> Option<Vec2> {
    let val = ini.get("Touchpads", key)?;
    match (val.len(), val.double(0), val.double(1)) {
        (2, Some(x), Some(y)) => Some(Vec2::new(x, y)),
        _ => {
            warn!(key, "Format error: expects 2 numeric values. Ignoring.");
            None
        }
    }
}

fn read_pad_sensitivity(ini: &Ini, key: &str, slot: &mut Vec2) {
    if let Some(v) = read_pad_pair(ini, key) {
        *slot = v;
        debug!(key, x = v.x, y = v.y, "Pad sensitivity set");
    }
}

fn read_pad_decay(ini: &Ini, key: &str, slot: &mut Vec2) {
    if let Some(v) = read_pad_pair(ini, key) {
        *slot = Vec2::new(v.x.clamp(0.0, 1.0), v.y.clamp(0.0, 1.0));
        debug!(key, x = slot.x, y = slot.y, "Pad inertial decay set");
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Structural profile load failure
#[derive(Debug)]
pub enum CompileError {
    /// The profile file does not exist
    NotFound(PathBuf),
    /// The document could not be read or parsed
    Source {
        path: Option<PathBuf>,
        source: IniError,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::NotFound(path) => {
                write!(f, "Profile file '{}' not found", path.display())
            }
            CompileError::Source {
                path: Some(path),
                source,
            } => write!(f, "Failed to parse profile '{}': {}", path.display(), source),
            CompileError::Source { path: None, source } => {
                write!(f, "Failed to parse profile: {}", source)
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::NotFound(_) => None,
            CompileError::Source { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evdev::{AbsoluteAxisCode, KeyCode, RelativeAxisCode};
    use std::io::Write;

    fn compile(text: &str) -> Profile {
        ProfileCompiler::new().compile_str(text).unwrap()
    }

    #[test]
    fn test_empty_document_is_default_template() {
        assert_eq!(compile(""), Profile::default());
    }

    #[test]
    fn test_profile_identity() {
        let prof = compile("[Profile]\nName = Desktop  mode\nDescription = \"Mouse on the right pad\"\n");
        assert_eq!(prof.name, "Desktop  mode");
        assert_eq!(prof.description, "Mouse on the right pad");
    }

    #[test]
    fn test_features() {
        let prof = compile(
            "[Features]\nForceFeedback = false\nMotionDevice = TRUE\nLizardMode = maybe\nMouseDevice = true false\n",
        );
        let defaults = Profile::default().features;
        assert!(!prof.features.force_feedback);
        assert!(prof.features.motion_device);
        // Malformed values keep the template
        assert_eq!(prof.features.lizard_mode, defaults.lizard_mode);
        assert_eq!(prof.features.mouse_device, defaults.mouse_device);
        assert_eq!(prof.features.stick_filtering, defaults.stick_filtering);
    }

    #[test]
    fn test_device_info() {
        let prof = compile(
            "[DeviceInfo]\n\
             Gamepad = 0x045E 0x028E 0x0110 \"Xbox 360 Pad\"\n\
             Motion = 0x28DE 0xZZZZ 0x0100 Motion\n\
             Mouse = 0x28DE 0x1000\n",
        );
        let defaults = Profile::default().devices;
        let gp = &prof.devices.gamepad;
        assert_eq!(gp.vendor_id, 0x045E);
        assert_eq!(gp.product_id, 0x028E);
        assert_eq!(gp.version_string(), "1.10");
        assert_eq!(gp.name, "Xbox 360 Pad");
        assert_eq!(prof.devices.motion, defaults.motion);
        assert_eq!(prof.devices.mouse, defaults.mouse);
    }

    #[test]
    fn test_deadzone_clamping() {
        let prof = compile(
            "[Deadzones]\nLStick = 0.25\nRStick = 1.5\nLPad = -3\nRPad = 0.9\nLTrigg = abc\nRTrigg = 0.1 0.2\n",
        );
        let dz = prof.deadzones;
        let defaults = Profile::default().deadzones;
        assert_eq!(dz.stick.left, 0.25);
        assert_eq!(dz.stick.right, 0.9);
        assert_eq!(dz.pad.left, 0.0);
        assert_eq!(dz.pad.right, 0.9);
        assert_eq!(dz.trigger.left, defaults.trigger.left);
        assert_eq!(dz.trigger.right, defaults.trigger.right);
    }

    #[test]
    fn test_deadzone_clamp_holds_for_many_values() {
        for raw in [-100.0, -0.5, 0.0, 0.3, 0.89, 0.9, 0.95, 1.0, 42.0] {
            let prof = compile(&format!("[Deadzones]\nLStick = {}\n", raw));
            assert_eq!(prof.deadzones.stick.left, f64::clamp(raw, 0.0, 0.9));
        }
    }

    #[test]
    fn test_touchpads() {
        let prof = compile(
            "[Touchpads]\nLPadSensitivity = 2.5 -1\nRPadSensitivity = 1\nLPadDecay = -0.5 1.5\nRPadDecay = 0.2 0.3\n",
        );
        let defaults = Profile::default().touchpads;
        assert_eq!(prof.touchpads.left.sensitivity, Vec2::new(2.5, -1.0));
        assert_eq!(prof.touchpads.right.sensitivity, defaults.right.sensitivity);
        assert_eq!(prof.touchpads.left.decay, Vec2::new(0.0, 1.0));
        assert_eq!(prof.touchpads.right.decay, Vec2::new(0.2, 0.3));
    }

    #[test]
    fn test_gamepad_axes() {
        let prof = compile(
            "[GamepadAxes]\n\
             ABS_X = -32768 32767 16 0\n\
             ABS_Y = -32768 32767\n\
             ABS_RX = 5 5\n\
             ABS_NOPE = 0 10\n\
             BTN_SOUTH = 0 1\n\
             ABS_Z = 0 x\n\
             ABS_HAT0X = -1 1 0 0 9\n",
        );
        let axes = &prof.devices.gamepad.abs_axes;
        assert_eq!(axes.len(), 2);
        assert_eq!(
            axes[0],
            AbsAxis {
                code: AbsoluteAxisCode::ABS_X,
                min: -32768,
                max: 32767,
                fuzz: 16,
                resolution: 0,
            }
        );
        assert_eq!(axes[1].code, AbsoluteAxisCode::ABS_Y);
        assert_eq!(axes[1].fuzz, 0);
        assert!(prof.devices.motion.abs_axes.is_empty());
    }

    #[test]
    fn test_motion_axes() {
        let prof = compile("[MotionAxes]\nABS_RX = -32768 32767 16 16\n");
        assert!(prof.devices.gamepad.abs_axes.is_empty());
        assert_eq!(prof.devices.motion.abs_axes.len(), 1);
        assert_eq!(prof.devices.motion.abs_axes[0].resolution, 16);
    }

    #[test]
    fn test_key_binding() {
        let prof = compile("[Bindings]\nA = Gamepad BTN_SOUTH\n");
        assert_eq!(
            prof.bindings.get(Input::A),
            &Binding::Event {
                device: VirtualDevice::Gamepad,
                event: EventBinding::Key(KeyCode::BTN_SOUTH),
            }
        );
        assert_eq!(prof.devices.gamepad.keys, vec![KeyCode::BTN_SOUTH]);
    }

    #[test]
    fn test_duplicate_key_registration() {
        let prof = compile(
            "[Bindings]\nA = gamepad btn_south\nL4 = Gamepad BTN_SOUTH\nB = Mouse BTN_LEFT\n",
        );
        assert_eq!(prof.devices.gamepad.keys, vec![KeyCode::BTN_SOUTH]);
        assert_eq!(prof.devices.mouse.keys, vec![KeyCode::BTN_LEFT]);
        assert!(!prof.bindings.get(Input::L4).is_none());
    }

    #[test]
    fn test_abs_binding_requires_enabled_axis() {
        let prof = compile(
            "[GamepadAxes]\nABS_HAT0Y = -1 1\n\
             [Bindings]\n\
             DpadUp = Gamepad ABS_HAT0Y -\n\
             DpadDown = Gamepad ABS_HAT0Y +\n\
             DpadLeft = Gamepad ABS_HAT0X -\n\
             DpadRight = Gamepad ABS_HAT0Y ?\n",
        );
        assert_eq!(
            prof.bindings.get(Input::DpadUp),
            &Binding::Event {
                device: VirtualDevice::Gamepad,
                event: EventBinding::Abs {
                    axis: AbsoluteAxisCode::ABS_HAT0Y,
                    positive: false,
                },
            }
        );
        assert!(matches!(
            prof.bindings.get(Input::DpadDown),
            Binding::Event { event: EventBinding::Abs { positive: true, .. }, .. }
        ));
        assert!(prof.bindings.get(Input::DpadLeft).is_none());
        assert!(prof.bindings.get(Input::DpadRight).is_none());
    }

    #[test]
    fn test_rel_binding_scale() {
        let prof = compile(
            "[Bindings]\n\
             RPadRelX = Mouse REL_X\n\
             RPadRelY = Mouse REL_Y 2.5\n\
             LPadRelX = Mouse REL_WHEEL 0\n\
             LPadRelY = Mouse REL_HWHEEL fast\n",
        );
        assert_eq!(
            prof.bindings.get(Input::RPadRelX),
            &Binding::Event {
                device: VirtualDevice::Mouse,
                event: EventBinding::Rel {
                    axis: RelativeAxisCode::REL_X,
                    scale: 1.0,
                },
            }
        );
        assert!(matches!(
            prof.bindings.get(Input::RPadRelY),
            Binding::Event { event: EventBinding::Rel { scale, .. }, .. } if *scale == 2.5
        ));
        // Zero scale is accepted
        assert!(matches!(
            prof.bindings.get(Input::LPadRelX),
            Binding::Event { event: EventBinding::Rel { scale, .. }, .. } if *scale == 0.0
        ));
        assert!(prof.bindings.get(Input::LPadRelY).is_none());
        assert_eq!(
            prof.devices.mouse.rel_axes,
            // Registered in binding table order, left pad before right pad
            vec![RelativeAxisCode::REL_WHEEL, RelativeAxisCode::REL_X, RelativeAxisCode::REL_Y]
        );
    }

    #[test]
    fn test_unsupported_device_events() {
        let prof = compile("[Bindings]\nA = Motion BTN_SOUTH\nB = Mouse ABS_X +\n");
        assert!(prof.bindings.get(Input::A).is_none());
        assert!(prof.bindings.get(Input::B).is_none());
        assert!(prof.devices.motion.keys.is_empty());
    }

    #[test]
    fn test_malformed_bindings_stay_none() {
        let prof = compile(
            "[Bindings]\n\
             A = Keyboard KEY_A\n\
             B = Gamepad\n\
             X = Gamepad BTN_BOGUS\n\
             Y = None\n\
             L1 =\n\
             R1 = Command true 0\n\
             R2 = Profile\n",
        );
        for input in [Input::A, Input::B, Input::X, Input::Y, Input::L1, Input::R1, Input::R2] {
            assert!(prof.bindings.get(input).is_none(), "{} should be None", input);
        }
        assert!(prof.devices.gamepad.keys.is_empty());
    }

    #[test]
    fn test_command_binding_wait_for_exit() {
        let prof = compile("[Bindings]\nQuickAccess = Command true 0 steam -quickaccess\n");
        match prof.bindings.get(Input::QuickAccess) {
            Binding::Command { command, delay_ms, id } => {
                assert_eq!(command, "steam -quickaccess");
                assert_eq!(*delay_ms, 0);
                assert_ne!(*id, 0);
            }
            other => panic!("expected command binding, got {:?}", other),
        }
    }

    #[test]
    fn test_command_binding_fire_and_forget() {
        let prof = compile("[Bindings]\nR4 = COMMAND false 250 pactl set-sink-volume @DEFAULT_SINK@  +5%\n");
        assert_eq!(
            prof.bindings.get(Input::R4),
            &Binding::Command {
                command: "pactl set-sink-volume @DEFAULT_SINK@  +5%".to_string(),
                delay_ms: 250,
                id: 0,
            }
        );
    }

    #[test]
    fn test_command_negative_delay_clamped() {
        let prof = compile("[Bindings]\nL5 = Command false -100 true\n");
        assert!(matches!(
            prof.bindings.get(Input::L5),
            Binding::Command { delay_ms: 0, .. }
        ));
    }

    #[test]
    fn test_command_bad_fields() {
        let prof = compile(
            "[Bindings]\nL4 = Command sometimes 0 ls\nR4 = Command true soon ls\n",
        );
        assert!(prof.bindings.get(Input::L4).is_none());
        assert!(prof.bindings.get(Input::R4).is_none());
    }

    #[test]
    fn test_command_ids_unique() {
        let text = "[Bindings]\nL4 = Command true 0 a\nR4 = Command true 0 b\nL5 = Command true 0 c\n";
        let first = compile(text);
        let second = compile(text);

        let mut ids: Vec<u32> = [&first, &second]
            .iter()
            .flat_map(|p| p.bindings.bound())
            .filter_map(|(_, b)| match b {
                Binding::Command { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 6);
        assert!(ids.iter().all(|id| *id != 0));
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_command_id_skips_zero_on_wrap() {
        assert_eq!(advance_command_id(1), 2);
        assert_eq!(advance_command_id(u32::MAX - 1), u32::MAX);
        assert_eq!(advance_command_id(u32::MAX), 1);
        assert_ne!(next_command_id(), 0);
    }

    #[test]
    fn test_profile_binding() {
        let prof = compile("[Bindings]\nSteam = Profile  Desktop mode\n");
        assert_eq!(
            prof.bindings.get(Input::Steam),
            &Binding::Profile {
                name: "Desktop mode".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_field_does_not_affect_rest() {
        let prof = compile(
            "[Deadzones]\nLStick = nope\nRStick = 0.3\n\
             [Bindings]\nA = Gamepad BTN_SOUTH\nB = Gamepad 12345\nX = Gamepad BTN_WEST\n",
        );
        assert_eq!(prof.deadzones.stick.left, Profile::default().deadzones.stick.left);
        assert_eq!(prof.deadzones.stick.right, 0.3);
        assert!(!prof.bindings.get(Input::A).is_none());
        assert!(prof.bindings.get(Input::B).is_none());
        assert!(!prof.bindings.get(Input::X).is_none());
    }

    #[test]
    fn test_custom_resolver() {
        let resolver = |name: &str| match name {
            "JUMP" => Some(EventCode::Key(KeyCode::BTN_SOUTH)),
            _ => None,
        };
        let prof = ProfileCompiler::with_resolver(resolver)
            .compile_str("[Bindings]\nA = Gamepad jump\nB = Gamepad BTN_EAST\n")
            .unwrap();
        assert!(!prof.bindings.get(Input::A).is_none());
        assert!(prof.bindings.get(Input::B).is_none());
    }

    #[test]
    fn test_profile_with_byte_order_mark() {
        let prof = compile("\u{feff}[Profile]\nName = X\n");
        assert_eq!(prof.name, "X");
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let err = ProfileCompiler::new()
            .compile_str("[Bindings]\nthis line has no separator\n")
            .unwrap_err();
        assert!(matches!(err, CompileError::Source { path: None, source: IniError::SyntaxError { line: 2, .. } }));
    }

    #[test]
    fn test_missing_file() {
        let err = ProfileCompiler::new()
            .compile("/nonexistent/deckd/missing.ini")
            .unwrap_err();
        assert!(matches!(err, CompileError::NotFound(_)));
        assert!(format!("{}", err).contains("not found"));
    }

    #[test]
    fn test_compile_file() {
        let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        write!(file, "[Profile]\nName = From disk\n[Bindings]\nB = Gamepad BTN_EAST\n").unwrap();

        let prof = ProfileCompiler::new().compile(file.path()).unwrap();
        assert_eq!(prof.name, "From disk");
        assert_eq!(prof.devices.gamepad.keys, vec![KeyCode::BTN_EAST]);
    }

    #[test]
    fn test_shipped_default_profile() {
        let prof = compile(include_str!("../profiles/default.ini"));
        assert_eq!(prof.name, "Default");
        assert!(!prof.bindings.get(Input::A).is_none());
        assert!(matches!(
            prof.bindings.get(Input::QuickAccess),
            Binding::Command { id, .. } if *id != 0
        ));
        assert!(!prof.devices.gamepad.abs_axes.is_empty());
    }
}
