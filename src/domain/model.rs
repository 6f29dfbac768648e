use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Physical GPIO number as the host numbers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId(pub u32);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio{}", self.0)
    }
}

/// Logical button index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u8);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Logical LED index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedId(pub u8);

impl fmt::Display for LedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "led{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSpec {
    pub id: ChannelId,
    /// Name printed in diagnostics ("A".."D" on the reference board).
    pub label: &'static str,
    pub line: LineId,
    pub debounce: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedSpec {
    pub id: LedId,
    pub line: LineId,
}

/// External script started when a button fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub interpreter: PathBuf,
    pub script_path: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ActionSpec {
    /// Argument list handed to the interpreter: the script followed by its fixed args.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.script_path.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// What a button does: drive one LED to a fixed level and start one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub button: ChannelId,
    pub led: LedId,
    pub target_on: bool,
    pub action: ActionSpec,
}

/// The compiled wiring of the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTable {
    pub buttons: Vec<ButtonSpec>,
    pub leds: Vec<LedSpec>,
    pub mappings: Vec<MappingEntry>,
}

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);
pub const SCRIPT_INTERPRETER: &str = "/usr/bin/sh";
pub const CONSUMER_LABEL: &str = "button-led-monitor";

fn script_env() -> BTreeMap<String, String> {
    [
        ("HOME", "/"),
        ("TERM", "linux"),
        ("PATH", "/sbin:/bin:/usr/sbin:/usr/bin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn script(path: &str) -> ActionSpec {
    ActionSpec {
        interpreter: PathBuf::from(SCRIPT_INTERPRETER),
        script_path: PathBuf::from(path),
        args: Vec::new(),
        env: script_env(),
    }
}

impl BoardTable {
    /// Four buttons on gpio 8, 7, 12, 16; two LEDs on gpio 21, 26.
    /// D/C set LED 0 off/on, B/A set LED 1 off/on.
    pub fn reference() -> Self {
        let buttons = [("D", 8), ("C", 7), ("B", 12), ("A", 16)]
            .into_iter()
            .enumerate()
            .map(|(i, (label, line))| ButtonSpec {
                id: ChannelId(i as u8),
                label,
                line: LineId(line),
                debounce: DEFAULT_DEBOUNCE,
            })
            .collect();

        let leds = vec![
            LedSpec {
                id: LedId(0),
                line: LineId(21),
            },
            LedSpec {
                id: LedId(1),
                line: LineId(26),
            },
        ];

        let mappings = vec![
            MappingEntry {
                button: ChannelId(0),
                led: LedId(0),
                target_on: false,
                action: script("/home/pi/button1.sh"),
            },
            MappingEntry {
                button: ChannelId(1),
                led: LedId(0),
                target_on: true,
                action: script("/home/pi/button2.sh"),
            },
            MappingEntry {
                button: ChannelId(2),
                led: LedId(1),
                target_on: false,
                action: script("/home/pi/button3.sh"),
            },
            MappingEntry {
                button: ChannelId(3),
                led: LedId(1),
                target_on: true,
                action: script("/home/pi/button4.sh"),
            },
        ];

        Self {
            buttons,
            leds,
            mappings,
        }
    }

    pub fn button(&self, id: ChannelId) -> Option<&ButtonSpec> {
        self.buttons.iter().find(|b| b.id == id)
    }

    pub fn led(&self, id: LedId) -> Option<&LedSpec> {
        self.leds.iter().find(|l| l.id == id)
    }

    pub fn mapping(&self, button: ChannelId) -> Option<&MappingEntry> {
        self.mappings.iter().find(|m| m.button == button)
    }

    /// Structural checks only; whether a line exists on the host is the backend's call.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let mut lines = HashSet::new();
        for line in self
            .buttons
            .iter()
            .map(|b| b.line)
            .chain(self.leds.iter().map(|l| l.line))
        {
            if !lines.insert(line) {
                return Err(format!("{} is used more than once", line));
            }
        }

        let mut mapped = HashSet::new();
        for entry in &self.mappings {
            if self.button(entry.button).is_none() {
                return Err(format!("mapping references unknown button {}", entry.button));
            }
            if self.led(entry.led).is_none() {
                return Err(format!("mapping references unknown {}", entry.led));
            }
            if !mapped.insert(entry.button) {
                return Err(format!("button {} is mapped twice", entry.button));
            }
        }

        if let Some(unmapped) = self.buttons.iter().find(|b| !mapped.contains(&b.id)) {
            return Err(format!("button {} has no mapping", unmapped.id));
        }

        Ok(())
    }
}
