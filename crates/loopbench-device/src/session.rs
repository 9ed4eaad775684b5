//! Device session: program identity plus an owned execution queue
//!
//! The session is the explicitly owned object the orchestrator drives —
//! no ambient singletons, no process-wide device handles. It resolves the
//! program artifact from a kernel name, a search directory and the build
//! mode, loads it into the queue at construction, and forwards argument
//! binding and kernel submission.

use std::path::{Path, PathBuf};

use crate::error::{DeviceError, Result};
use crate::event::Event;
use crate::queue::{DeviceQueue, KernelArg};

/// Artifact file extension produced by the accelerator toolchain.
pub const ARTIFACT_EXTENSION: &str = "xclbin";

/// Build flavour of the program artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Real hardware bitstream
    Hardware,
    /// Hardware-emulation build
    HwEmulation,
}

impl BuildMode {
    /// Derive the build mode from an externally supplied emulation-mode
    /// indicator (typically the `XCL_EMULATION_MODE` environment
    /// variable). Absent means hardware; `hw_emu` selects the emulation
    /// build; anything else is a fatal setup error.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::UnsupportedEmulationMode`] for unknown
    /// indicator values.
    pub fn from_indicator(indicator: Option<&str>) -> Result<Self> {
        match indicator {
            None => Ok(Self::Hardware),
            Some("hw_emu") => Ok(Self::HwEmulation),
            Some(other) => Err(DeviceError::UnsupportedEmulationMode {
                mode: other.to_string(),
            }),
        }
    }

    /// Artifact-name suffix for this mode.
    #[must_use]
    pub const fn suffix(&self) -> &'static str {
        match self {
            Self::Hardware => "hw",
            Self::HwEmulation => "hw_emu",
        }
    }
}

/// Resolve the program artifact path: `<dir>/<kernel>.<mode>.xclbin`.
#[must_use]
pub fn artifact_path(dir: &Path, kernel_name: &str, mode: BuildMode) -> PathBuf {
    dir.join(format!(
        "{kernel_name}.{}.{ARTIFACT_EXTENSION}",
        mode.suffix()
    ))
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Kernel name inside the program artifact
    pub kernel_name: String,
    /// Directory searched for the artifact
    pub search_dir: PathBuf,
    /// Build flavour to load
    pub mode: BuildMode,
}

/// An opened device session: compiled program, kernel handle, queue.
///
/// Drop order releases the queue (and with it kernel, program and
/// buffers) after the orchestration layer has released its events.
#[derive(Debug)]
pub struct DeviceSession {
    queue: Box<dyn DeviceQueue>,
    kernel_name: String,
    artifact: PathBuf,
}

impl DeviceSession {
    /// Resolve the artifact and load it into the queue.
    ///
    /// # Errors
    ///
    /// Propagates the queue's load failure; this is a fatal setup error.
    pub fn new(mut queue: Box<dyn DeviceQueue>, config: &SessionConfig) -> Result<Self> {
        let artifact = artifact_path(&config.search_dir, &config.kernel_name, config.mode);
        tracing::debug!(
            "loading kernel {} from {}",
            config.kernel_name,
            artifact.display()
        );
        queue.load_program(&artifact, &config.kernel_name)?;
        tracing::info!("device session ready: kernel {}", config.kernel_name);
        Ok(Self {
            queue,
            kernel_name: config.kernel_name.clone(),
            artifact,
        })
    }

    /// Kernel name this session was built for.
    #[must_use]
    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    /// Resolved artifact path.
    #[must_use]
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Bind kernel parameter `index`.
    ///
    /// # Errors
    ///
    /// Propagates queue rejection of the argument.
    pub fn set_arg(&mut self, index: u32, arg: KernelArg) -> Result<()> {
        self.queue.set_arg(index, arg)
    }

    /// Submit one kernel invocation ordered after `wait`.
    ///
    /// # Errors
    ///
    /// Propagates queue enqueue failure.
    pub fn enqueue_execution(&mut self, wait: &[Event]) -> Result<Event> {
        self.queue.enqueue_kernel(wait)
    }

    /// Mutable access to the queue, for buffer allocation and transfers.
    pub fn queue_mut(&mut self) -> &mut dyn DeviceQueue {
        self.queue.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareQueue;

    #[test]
    fn build_mode_from_indicator() {
        assert_eq!(
            BuildMode::from_indicator(None).unwrap(),
            BuildMode::Hardware
        );
        assert_eq!(
            BuildMode::from_indicator(Some("hw_emu")).unwrap(),
            BuildMode::HwEmulation
        );
        let err = BuildMode::from_indicator(Some("sw_emu")).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::UnsupportedEmulationMode { mode } if mode == "sw_emu"
        ));
    }

    #[test]
    fn artifact_name_carries_mode_suffix_and_extension() {
        let hw = artifact_path(Path::new("xclbin"), "loopback1_kernel", BuildMode::Hardware);
        assert_eq!(hw, Path::new("xclbin/loopback1_kernel.hw.xclbin"));

        let emu = artifact_path(
            Path::new("/opt/bins"),
            "loopback4_kernel",
            BuildMode::HwEmulation,
        );
        assert_eq!(emu, Path::new("/opt/bins/loopback4_kernel.hw_emu.xclbin"));
    }

    #[test]
    fn session_loads_program_at_construction() {
        let config = SessionConfig {
            kernel_name: "loopback1_kernel".to_string(),
            search_dir: PathBuf::from("xclbin"),
            mode: BuildMode::Hardware,
        };
        let session = DeviceSession::new(Box::new(SoftwareQueue::new()), &config).unwrap();
        assert_eq!(session.kernel_name(), "loopback1_kernel");
        assert_eq!(
            session.artifact(),
            Path::new("xclbin/loopback1_kernel.hw.xclbin")
        );
    }

    #[test]
    fn session_rejects_empty_kernel_name() {
        let config = SessionConfig {
            kernel_name: String::new(),
            search_dir: PathBuf::from("xclbin"),
            mode: BuildMode::Hardware,
        };
        let err = DeviceSession::new(Box::new(SoftwareQueue::new()), &config).unwrap_err();
        assert!(matches!(err, DeviceError::ProgramLoad { .. }));
    }
}
