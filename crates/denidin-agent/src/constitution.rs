use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

/// Runtime-editable system preamble text, reloaded on file-mtime change.
/// A single lock makes a rare double-load acceptable rather than something
/// to engineer around.
pub struct ConstitutionCache {
    path: PathBuf,
    cached: Mutex<Option<(String, SystemTime)>>,
}

impl ConstitutionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns the current constitution text, reloading from disk only if
    /// the file's mtime has changed since the last read.
    pub fn get(&self) -> std::io::Result<String> {
        let mtime = fs::metadata(&self.path)?.modified()?;
        let mut cached = self.cached.lock().unwrap();
        if let Some((text, cached_mtime)) = cached.as_ref() {
            if *cached_mtime == mtime {
                return Ok(text.clone());
            }
        }
        let text = fs::read_to_string(&self.path)?;
        *cached = Some((text.clone(), mtime));
        Ok(text)
    }
}
