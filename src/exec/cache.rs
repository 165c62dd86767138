use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::CompilerPreset;

/// Last successful build per source file, keyed by content and preset hashes.
///
/// Shared by every run of one orchestrator; any configuration change clears it
/// wholesale.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: Mutex<HashMap<PathBuf, String>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `sha256(source bytes) ++ sha256(serialized preset)`
    pub fn key_for(source: &Path, preset: &CompilerPreset) -> std::io::Result<String> {
        let bytes = std::fs::read(source)?;
        Ok(format!(
            "{}{}",
            sha256_hex(&bytes),
            sha256_hex(&preset.fingerprint())
        ))
    }

    pub fn is_fresh(&self, source: &Path, key: &str) -> bool {
        self.entries
            .lock()
            .get(source)
            .is_some_and(|cached| cached == key)
    }

    pub fn record(&self, source: &Path, key: String) {
        self.entries.lock().insert(source.to_path_buf(), key);
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            log::debug!("Compile cache cleared ({} entries)", entries.len());
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
