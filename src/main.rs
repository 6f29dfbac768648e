use anyhow::Context;
use button_led_monitor::domain::model::{ActionSpec, LineId};
use button_led_monitor::domain::ports::{ActionLauncher, EdgeSource, LineManager};
use button_led_monitor::utils::error::ErrorSeverity;
use button_led_monitor::utils::{logger, validation::Validate};
use button_led_monitor::{
    Backend, BoardTable, CliConfig, EdgeHub, Lifecycle, ProcessLauncher, RecordingLauncher,
    Settings, SimulatedBoard, SysfsGpio, TeardownReport, TomlConfig,
};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

enum Launcher {
    Process(ProcessLauncher),
    Recording(RecordingLauncher),
}

impl ActionLauncher for Launcher {
    fn launch_detached(&self, action: &ActionSpec) -> button_led_monitor::Result<()> {
        match self {
            Launcher::Process(launcher) => launcher.launch_detached(action),
            Launcher::Recording(launcher) => launcher.launch_detached(action),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入設定檔 (可選)
    let file = match &cli.config {
        Some(path) => {
            let config = TomlConfig::from_file(path)
                .with_context(|| format!("Failed to load config file '{}'", path))?;
            if let Err(e) = config.validate() {
                eprintln!("❌ {}", e);
                eprintln!("💡 {}", e.recovery_suggestion());
                std::process::exit(1);
            }
            Some(config)
        }
        None => None,
    };
    let settings = Settings::resolve(file.as_ref(), &cli);

    // 初始化日誌
    if settings.json_logs {
        logger::init_json_logger(settings.verbose, settings.log_level.as_deref());
    } else {
        logger::init_cli_logger(settings.verbose, settings.log_level.as_deref());
    }
    tracing::debug!("Settings: {:?}", settings);

    if let Err(e) = settings.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let table = BoardTable::reference();
    if cli.dry_run {
        return dry_run(&table, &settings);
    }

    let launcher = if settings.actions_enabled {
        Launcher::Process(ProcessLauncher::current()?)
    } else {
        tracing::info!("Actions disabled, scripts will only be logged");
        Launcher::Recording(RecordingLauncher::new())
    };

    match settings.backend {
        Backend::Sysfs => {
            let gpio = Arc::new(SysfsGpio::new(&settings.sysfs_root, settings.poll_interval));
            run(table, gpio, launcher, None).await
        }
        Backend::Simulated => {
            tracing::info!("🔧 Using simulated board; type 'press <gpio>', 'status' or 'quit'");
            let board = Arc::new(SimulatedBoard::new());
            run(table, Arc::clone(&board), launcher, Some(board)).await
        }
    }
}

fn dry_run(table: &BoardTable, settings: &Settings) -> anyhow::Result<()> {
    if let Err(message) = table.check_consistency() {
        anyhow::bail!("board table is inconsistent: {}", message);
    }
    println!("Backend: {:?} ({})", settings.backend, settings.sysfs_root.display());
    for button in &table.buttons {
        if let Some(entry) = table.mapping(button.id) {
            println!(
                "button {} on {} ({} ms) -> led{} {} + {} {}",
                button.label,
                button.line,
                button.debounce.as_millis(),
                entry.led.0,
                if entry.target_on { "on" } else { "off" },
                entry.action.interpreter.display(),
                entry.action.argv().join(" ")
            );
        }
    }
    for led in &table.leds {
        println!("{} on {}", led.id, led.line);
    }
    println!("✅ Configuration is valid");
    Ok(())
}

async fn run<B>(
    table: BoardTable,
    backend: Arc<B>,
    launcher: Launcher,
    simulated: Option<Arc<SimulatedBoard>>,
) -> anyhow::Result<()>
where
    B: LineManager + EdgeSource,
{
    let hub = Arc::new(EdgeHub::new(Arc::clone(&backend)));
    let mut lifecycle = Lifecycle::new(table, backend, hub, Arc::new(launcher));

    if let Err(e) = lifecycle.setup().await {
        tracing::error!("❌ Setup failed: {} (Severity: {:?})", e, e.severity());
        eprintln!("❌ {}", e);
        eprintln!("💡 {}", e.recovery_suggestion());
        let exit_code = match e.severity() {
            ErrorSeverity::Critical => 3,
            _ => 1,
        };
        std::process::exit(exit_code);
    }

    wait_for_shutdown(&lifecycle, simulated).await?;

    let report = lifecycle.teardown().await;
    print_report(&report)?;
    if !report.is_clean() {
        tracing::warn!("Teardown finished with {} failure(s)", report.failures.len());
    }
    Ok(())
}

async fn wait_for_shutdown<L, N, A>(
    lifecycle: &Lifecycle<L, N, A>,
    simulated: Option<Arc<SimulatedBoard>>,
) -> anyhow::Result<()>
where
    L: LineManager,
    N: button_led_monitor::domain::ports::EdgeNotifier,
    A: ActionLauncher,
{
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let mut commands = BufReader::new(tokio::io::stdin()).lines();

    loop {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
            _ = terminated => {
                tracing::info!("Terminated, shutting down");
                return Ok(());
            }
            line = commands.next_line(), if simulated.is_some() => {
                let Some(line) = line? else { return Ok(()) };
                let Some(board) = simulated.as_ref() else { continue };
                match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                    ["press", gpio] => match gpio.parse::<u32>() {
                        Ok(gpio) => board.press(LineId(gpio)),
                        Err(_) => println!("not a gpio number: {}", gpio),
                    },
                    ["status"] => println!("{}", serde_json::to_string_pretty(&lifecycle.snapshot())?),
                    ["quit"] | ["exit"] => return Ok(()),
                    [] => {}
                    _ => println!("commands: press <gpio>, status, quit"),
                }
            }
        }
    }
}

fn print_report(report: &TeardownReport) -> anyhow::Result<()> {
    if let Some(status) = &report.final_status {
        for button in &status.buttons {
            println!("button {} was pressed {} times", button.label, button.presses);
        }
        tracing::debug!("Final status: {}", serde_json::to_string(status)?);
    }
    for failure in &report.failures {
        eprintln!("⚠️  {}", failure);
    }
    Ok(())
}
