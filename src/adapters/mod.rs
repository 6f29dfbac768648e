// Adapters layer: concrete GPIO backends and process launching behind the domain ports.

pub mod launcher;
pub mod simulated;
pub mod sysfs;

pub use launcher::ProcessLauncher;
pub use simulated::{RecordingLauncher, SimulatedBoard};
pub use sysfs::SysfsGpio;
