//! Periodic refresh of the library model from the real hardware.

use super::LibraryState;
use crate::config::LibrarySettings;
use crate::parse::{
    parse_device_list, parse_df, parse_mtx_status, parse_sg_listing, parse_windows_drives,
    ParseError, SgKind,
};
use crate::process::{CommandRunner, CommandSpec, ProcessError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a collected status stays fresh.
pub const STATUS_CACHE_WINDOW: Duration = Duration::from_secs(15);

/// Settle time after unmounting everything during initialization.
const INIT_SETTLE_WAIT: Duration = Duration::from_secs(5);

/// Errors from refreshing library state.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// A tool could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A tool reported an unusable library.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A tool exited non-zero.
    #[error("'{command}' failed with exit code {exit_code}: {message}")]
    Tool {
        /// The failed command line.
        command: String,
        /// Its exit code.
        exit_code: i32,
        /// Last output line.
        message: String,
    },

    /// The changer device has not been resolved yet.
    #[error("changer device not resolved; run initialization first")]
    ChangerUnresolved,
}

/// Whether the engine drives the Linux or the Windows LTFS stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `ltfs`/`umount`/`df` and `/dev/sg*` devices.
    Linux,
    /// `LtfsCmd*` wrappers and drive letters.
    Windows,
}

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// Refreshes [`LibraryState`] from `mtx status` with a 15 s cache window,
/// and resolves device names at startup.
pub struct StatusCollector {
    state: Arc<LibraryState>,
    runner: Arc<dyn CommandRunner>,
    settings: LibrarySettings,
    platform: Platform,
    last_refresh: Mutex<Option<Instant>>,
    initialized: AtomicBool,
    slots_created: AtomicBool,
}

impl StatusCollector {
    /// Create a collector over `state`.
    pub fn new(
        state: Arc<LibraryState>,
        runner: Arc<dyn CommandRunner>,
        settings: LibrarySettings,
        platform: Platform,
    ) -> Self {
        Self {
            state,
            runner,
            settings,
            platform,
            last_refresh: Mutex::new(None),
            initialized: AtomicBool::new(false),
            slots_created: AtomicBool::new(false),
        }
    }

    /// Whether initialization completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// One-time startup: resolve device names, tear down stale mounts and
    /// take the first full scan. Subsequent calls are no-ops.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.platform {
            Platform::Linux => self.initialize_linux(cancel).await?,
            Platform::Windows => self.initialize_windows(),
        }

        self.collect_status(true, cancel).await?;
        self.initialized.store(true, Ordering::Release);
        info!("library initialized");
        Ok(())
    }

    /// Refresh drives and slots from `mtx status`.
    ///
    /// Skipped when the last refresh is younger than
    /// [`STATUS_CACHE_WINDOW`] and `force` is false. Concurrent callers
    /// serialize; the loser of the race sees a fresh cache and skips.
    pub async fn collect_status(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), CollectorError> {
        let mut last_refresh = self.last_refresh.lock().await;
        if !force
            && last_refresh
                .as_ref()
                .is_some_and(|at| at.elapsed() < STATUS_CACHE_WINDOW)
        {
            return Ok(());
        }

        let changer = self
            .state
            .changer_device()
            .ok_or(CollectorError::ChangerUnresolved)?;

        let output = self
            .run_capture(
                CommandSpec::new(self.settings.mtx_tool(), &["-f", &changer, "status"]),
                cancel,
            )
            .await?;
        let records = parse_mtx_status(&output)?;
        let create_slots = !self.slots_created.swap(true, Ordering::AcqRel);
        self.state.apply_elements(&records, create_slots);

        if self.platform == Platform::Windows {
            let listing = self
                .run_capture(
                    CommandSpec::new(self.settings.ltfs_tool("LtfsCmdDrives"), &[]),
                    cancel,
                )
                .await?;
            self.state.apply_windows_rows(&parse_windows_drives(&listing));
        }

        *last_refresh = Some(Instant::now());
        Ok(())
    }

    async fn initialize_linux(&self, cancel: &CancellationToken) -> Result<(), CollectorError> {
        // Stale LTFS mounts from a previous run hold the devices open.
        let df = self
            .run_capture(
                CommandSpec::new("df", &["-h", "--output=source,size,avail,target"]),
                cancel,
            )
            .await?;
        for mount in parse_df(&df) {
            info!(target = %mount.target, "unmounting stale LTFS filesystem");
            let outcome = self
                .runner
                .run(
                    CommandSpec::new("umount", &[&mount.target]),
                    cancel.clone(),
                    None,
                )
                .await?;
            if !outcome.success() {
                warn!(target = %mount.target, "stale unmount failed: {}", outcome.last_message);
            }
        }
        tokio::time::sleep(INIT_SETTLE_WAIT).await;

        let listing = self
            .run_capture(
                CommandSpec::new(self.settings.ltfs_tool("ltfs"), &["-o", "device_list"]),
                cancel,
            )
            .await?;
        let devices = parse_device_list(&listing);
        for device in &devices {
            let matched = self.state.with_drive_by_address(&device.address, |drive| {
                drive.device_name = Some(device.device_name.clone());
                if device.serial.is_some() {
                    drive.serial = device.serial.clone();
                }
            });
            if matched.is_none() {
                warn!(address = %device.address, "device listing for unconfigured address ignored");
            }
        }

        let sg = self
            .run_capture(CommandSpec::new("ls", &["/dev/sg", "-l"]), cancel)
            .await?;
        for entry in parse_sg_listing(&sg) {
            match entry.kind {
                SgKind::Changer => {
                    info!(device = %entry.device, "resolved changer device");
                    self.state.set_changer_device(entry.device);
                }
                SgKind::Tape { serial } => {
                    // Fallback resolution for drives the device list missed.
                    self.state.with_drive_by_serial(&serial, |drive| {
                        if drive.device_name.is_none() {
                            drive.device_name = Some(entry.device.clone());
                        }
                    });
                }
            }
        }
        Ok(())
    }

    fn initialize_windows(&self) {
        let changer = format!("Changer{}", self.settings.mtx_changer);
        info!(changer = %changer, "using configured changer device");
        self.state.set_changer_device(changer);
    }

    async fn run_capture(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<String, CollectorError> {
        let command = spec.display_line();
        let lines: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&lines);
        let outcome = self
            .runner
            .run(
                spec,
                cancel.clone(),
                Some(Arc::new(move |line: &str| {
                    sink.lock().unwrap().push(line.to_string());
                })),
            )
            .await?;
        if !outcome.success() {
            return Err(CollectorError::Tool {
                command,
                exit_code: outcome.exit_code,
                message: outcome.last_message,
            });
        }
        let joined = lines.lock().unwrap().join("\n");
        Ok(joined)
    }
}
