#![allow(dead_code)]

use button_led_monitor::{BoardTable, EdgeHub, Lifecycle, RecordingLauncher, SimulatedBoard};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type TestLifecycle =
    Lifecycle<SimulatedBoard, EdgeHub<SimulatedBoard>, RecordingLauncher>;

pub struct Rig {
    pub board: Arc<SimulatedBoard>,
    pub hub: Arc<EdgeHub<SimulatedBoard>>,
    pub launcher: Arc<RecordingLauncher>,
    pub lifecycle: TestLifecycle,
}

pub fn rig() -> Rig {
    rig_with(BoardTable::reference())
}

pub fn rig_with(table: BoardTable) -> Rig {
    let board = Arc::new(SimulatedBoard::new());
    let hub = Arc::new(EdgeHub::new(Arc::clone(&board)));
    let launcher = Arc::new(RecordingLauncher::new());
    let lifecycle = Lifecycle::new(
        table,
        Arc::clone(&board),
        Arc::clone(&hub),
        Arc::clone(&launcher),
    );
    Rig {
        board,
        hub,
        launcher,
        lifecycle,
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Formatted log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes events on the current thread into a buffer until the guard drops.
/// Only covers tasks that run on this thread, so use a current-thread runtime.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogBuffer) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (tracing::subscriber::set_default(subscriber), logs)
}
