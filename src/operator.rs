//! Operator-facing collaborators: the permission gate checked before device
//! acquisition and the surface failures are reported on.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::SessionError;

/// Must succeed before any audio device is opened.
pub trait PermissionGate: Send + Sync {
    fn check(&self) -> Result<(), SessionError>;
}

/// Receives user-visible failures as a title/message pair.
pub trait ErrorSurface: Send + Sync {
    fn report(&self, title: &str, message: &str);
}

/// Checks that the ALSA device nodes can be opened by this user.
///
/// Access is denied only when every PCM node refuses with a permission
/// error; busy or missing nodes are left for ALSA to report. Nodes are opened
/// with `O_NONBLOCK` so a device held by another process never stalls the
/// check. A system with no `/dev/snd` at all (sound server only) passes.
pub struct SoundDeviceGate {
    dev_dir: PathBuf,
}

impl SoundDeviceGate {
    pub fn new() -> Self {
        Self::with_dir("/dev/snd")
    }

    pub fn with_dir(dev_dir: impl AsRef<Path>) -> Self {
        Self {
            dev_dir: dev_dir.as_ref().to_path_buf(),
        }
    }
}

impl Default for SoundDeviceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGate for SoundDeviceGate {
    fn check(&self) -> Result<(), SessionError> {
        let entries = match fs::read_dir(&self.dev_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(SessionError::PermissionDenied(format!(
                    "cannot read {}: {}",
                    self.dev_dir.display(),
                    e
                )));
            }
            Err(e) => {
                log::warn!("Skipping permission check for {}: {}", self.dev_dir.display(), e);
                return Ok(());
            }
        };

        let mut pcm_nodes = 0;
        let mut denied = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            // Capture nodes look like pcmC0D0c.
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with("pcmC") && name.ends_with('c')) {
                continue;
            }
            pcm_nodes += 1;
            let opened = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(entry.path());
            match opened {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::PermissionDenied => denied += 1,
                Err(e) => log::debug!("{} not checked: {}", name, e),
            }
        }

        if pcm_nodes > 0 && denied == pcm_nodes {
            return Err(SessionError::PermissionDenied(format!(
                "no access to capture devices in {} (is this user in the audio group?)",
                self.dev_dir.display()
            )));
        }
        Ok(())
    }
}

/// Logs failures and echoes them on stderr for the operator.
pub struct ConsoleSurface;

impl ErrorSurface for ConsoleSurface {
    fn report(&self, title: &str, message: &str) {
        log::error!("{}: {}", title, message);
        eprintln!("[{}] {}", title, message);
    }
}
