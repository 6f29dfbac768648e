use crate::core::registry::lock;
use crate::domain::model::LineId;
use crate::domain::ports::{
    Direction, Edge, EdgeEvent, EdgeSource, EdgeStream, LineHandle, LineManager,
};
use crate::utils::error::{MonitorError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct SysfsLine {
    debounce: Duration,
}

/// GPIO access through the legacy `/sys/class/gpio` interface.
///
/// The kernel interface has no debounce, so the configured interval is only
/// recorded here and handed to the notification layer with each edge stream.
/// Edges are found by polling `value`.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    poll_interval: Duration,
    lines: Mutex<HashMap<LineId, SysfsLine>>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
            lines: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn line_dir(&self, line: LineId) -> PathBuf {
        self.root.join(format!("gpio{}", line.0))
    }

    fn attr(&self, line: LineId, name: &str) -> PathBuf {
        self.line_dir(line).join(name)
    }

    fn write_attr(&self, line: LineId, name: &str, value: &str) -> Result<()> {
        fs::write(self.attr(line, name), value).map_err(|e| MonitorError::LineIo {
            line,
            message: format!("writing {}: {}", name, e),
        })
    }

    fn ensure_requested(&self, handle: LineHandle) -> Result<()> {
        if lock(&self.lines).contains_key(&handle.line()) {
            Ok(())
        } else {
            Err(MonitorError::NotAcquired {
                line: handle.line(),
            })
        }
    }

    /// `(base, ngpio)` of every gpiochip under the root.
    fn chip_ranges(&self) -> Vec<(u32, u32)> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("gpiochip"))
            .filter_map(|entry| {
                let base = read_number(&entry.path().join("base"))?;
                let ngpio = read_number(&entry.path().join("ngpio"))?;
                Some((base, ngpio))
            })
            .collect()
    }
}

fn read_number(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn parse_level(line: LineId, raw: &str) -> Result<bool> {
    match raw.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(MonitorError::LineIo {
            line,
            message: format!("unexpected value '{}'", other),
        }),
    }
}

impl LineManager for SysfsGpio {
    fn is_valid_line(&self, line: LineId) -> bool {
        self.chip_ranges()
            .iter()
            .any(|(base, ngpio)| {
                let line = u64::from(line.0);
                line >= u64::from(*base) && line < u64::from(*base) + u64::from(*ngpio)
            })
    }

    fn request_line(&self, line: LineId, consumer: &str) -> Result<LineHandle> {
        let mut lines = lock(&self.lines);
        if lines.contains_key(&line) {
            return Err(MonitorError::AlreadyAcquired { line });
        }
        // An existing gpioN directory belongs to another consumer.
        if self.line_dir(line).exists() {
            return Err(MonitorError::AcquisitionFailure {
                line,
                message: "already exported by another consumer".to_string(),
            });
        }
        fs::write(self.root.join("export"), line.0.to_string()).map_err(|e| {
            MonitorError::AcquisitionFailure {
                line,
                message: format!("export failed: {}", e),
            }
        })?;
        tracing::debug!("{} requested for {}", line, consumer);
        lines.insert(line, SysfsLine::default());
        Ok(LineHandle::new(line))
    }

    fn set_direction(&self, handle: LineHandle, direction: Direction) -> Result<()> {
        self.ensure_requested(handle)?;
        let value = match direction {
            Direction::Input => "in",
            Direction::Output { initial: false } => "low",
            Direction::Output { initial: true } => "high",
        };
        self.write_attr(handle.line(), "direction", value)?;
        if direction == Direction::Input {
            // Not every chip supports edge interrupts; polling works regardless.
            if let Err(e) = self.write_attr(handle.line(), "edge", "rising") {
                tracing::debug!("{}", e);
            }
        }
        Ok(())
    }

    fn set_debounce(&self, handle: LineHandle, debounce: Duration) -> Result<()> {
        let mut lines = lock(&self.lines);
        let line = lines
            .get_mut(&handle.line())
            .ok_or(MonitorError::NotAcquired {
                line: handle.line(),
            })?;
        line.debounce = debounce;
        Ok(())
    }

    fn read_level(&self, handle: LineHandle) -> Result<bool> {
        self.ensure_requested(handle)?;
        let raw = fs::read_to_string(self.attr(handle.line(), "value")).map_err(|e| {
            MonitorError::LineIo {
                line: handle.line(),
                message: format!("reading value: {}", e),
            }
        })?;
        parse_level(handle.line(), &raw)
    }

    fn write_level(&self, handle: LineHandle, level: bool) -> Result<()> {
        self.ensure_requested(handle)?;
        self.write_attr(handle.line(), "value", if level { "1" } else { "0" })
    }

    fn export_for_inspection(&self, handle: LineHandle) -> Result<()> {
        // Requesting a line through sysfs already exports it.
        self.ensure_requested(handle)
    }

    fn release_line(&self, handle: LineHandle) -> Result<()> {
        let line = handle.line();
        if lock(&self.lines).remove(&line).is_none() {
            return Ok(());
        }
        fs::write(self.root.join("unexport"), line.0.to_string()).map_err(|e| {
            MonitorError::ReleaseFailure {
                line,
                message: format!("unexport failed: {}", e),
            }
        })
    }
}

impl EdgeSource for SysfsGpio {
    fn edge_stream(&self, handle: LineHandle) -> Result<EdgeStream> {
        let line = handle.line();
        let debounce = lock(&self.lines)
            .get(&line)
            .map(|l| l.debounce)
            .ok_or(MonitorError::NotAcquired { line })?;
        let value_path = self.attr(line, "value");
        let initial = parse_level(
            line,
            &fs::read_to_string(&value_path).map_err(|e| MonitorError::LineIo {
                line,
                message: format!("reading value: {}", e),
            })?,
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last = initial;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let level = match tokio::fs::read_to_string(&value_path).await {
                    Ok(raw) => match parse_level(line, &raw) {
                        Ok(level) => level,
                        Err(_) => continue,
                    },
                    // Unexported underneath us.
                    Err(_) => break,
                };
                if level == last {
                    continue;
                }
                last = level;
                let event = EdgeEvent {
                    edge: if level { Edge::Rising } else { Edge::Falling },
                    at: Instant::now(),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            tracing::debug!("Stopped polling {}", line);
        });

        Ok(EdgeStream {
            events: rx,
            debounce,
        })
    }
}
