//! Temporary artifact files and their lifecycle.
//!
//! The output path is reserved before execution with an exclusive create, so
//! two concurrent runs of the same script can never hand each other their
//! image. The slot owns the file: whatever happens downstream (timeout,
//! script fault, success), dropping the slot deletes it.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{RenderError, Result};
use crate::sandbox::executor::ScriptExecutor;

/// Length of the script fingerprint used in artifact filenames.
const FINGERPRINT_LEN: usize = 16;

/// An exclusively reserved output file in the temp directory.
pub struct ArtifactSlot {
    path: PathBuf,
}

impl ArtifactSlot {
    /// Reserve an output path derived from the script's content fingerprint.
    ///
    /// A fingerprint collision (the same script running concurrently) falls
    /// back to a random unique name rather than failing the request.
    pub fn allocate(temp_dir: &Path, script: &str) -> Result<Self> {
        let digest = hex::encode(Sha256::digest(script.as_bytes()));
        let fingerprint = &digest[..FINGERPRINT_LEN];

        let candidate = temp_dir.join(format!("plot-{fingerprint}.png"));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => Ok(Self { path: candidate }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let unique =
                    temp_dir.join(format!("plot-{fingerprint}-{}.png", uuid::Uuid::new_v4()));
                OpenOptions::new().write(true).create_new(true).open(&unique)?;
                Ok(Self { path: unique })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The reserved path scripts write to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the produced image and release the slot.
    ///
    /// Reservation pre-creates the file empty, so a zero-length file means
    /// the script never wrote an image.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(RenderError::ArtifactMissing),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RenderError::ArtifactMissing),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ArtifactSlot {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Run a script against a freshly reserved output slot and return the image
/// bytes. The temp file is deleted on every path out of this function.
pub async fn with_output_slot(executor: &ScriptExecutor, script: &str) -> Result<Vec<u8>> {
    let slot = ArtifactSlot::allocate(executor.temp_dir(), script)?;
    let report = executor.execute(script, slot.path()).await?;
    if !report.stderr.is_empty() {
        tracing::debug!(stderr = %report.stderr.trim(), "script wrote to stderr");
    }
    slot.into_bytes()
}
