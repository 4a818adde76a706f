// SPDX-License-Identifier: GPL-3.0-only

//! Persisted ordered list of scanned otpauth URLs
//!
//! The list lives in a newline-delimited UTF-8 file. Every operation reads
//! the whole file, applies the change and writes it back, so the file is the
//! only state. A missing file is an empty list.

use crate::constants::app;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    /// The value to edit or swap is not in the list
    NotFound(String),
    /// Values must fit on one line
    InvalidValue(String),
    /// No data directory could be determined
    NoDataDir,
    /// Reading or writing the file failed
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(value) => write!(f, "Not in list: {}", value),
            StorageError::InvalidValue(value) => {
                write!(f, "Value must be a single non-empty line: {:?}", value)
            }
            StorageError::NoDataDir => write!(f, "Could not determine data directory"),
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Default location of the URL list
pub fn default_codes_path() -> StorageResult<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(app::DIR_NAME).join(app::CODES_FILE))
        .ok_or(StorageError::NoDataDir)
}

/// Newline-delimited list of URLs kept in insertion order
#[derive(Debug, Clone)]
pub struct UrlStore {
    path: PathBuf,
}

impl UrlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_codes_path`]
    pub fn open_default() -> StorageResult<Self> {
        Ok(Self::new(default_codes_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All values in order
    pub fn list(&self) -> StorageResult<Vec<String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn contains(&self, value: &str) -> StorageResult<bool> {
        Ok(self.list()?.iter().any(|v| v == value))
    }

    /// Append a value
    pub fn add(&self, value: &str) -> StorageResult<()> {
        validate(value)?;
        let mut values = self.list()?;
        values.push(value.to_string());
        self.write(&values)?;
        info!(path = %self.path.display(), count = values.len(), "Added URL");
        Ok(())
    }

    /// Remove the first occurrence of a value; absent values are ignored
    pub fn remove(&self, value: &str) -> StorageResult<()> {
        let mut values = self.list()?;
        match values.iter().position(|v| v == value) {
            Some(index) => {
                values.remove(index);
                self.write(&values)?;
                info!(path = %self.path.display(), count = values.len(), "Removed URL");
            }
            None => debug!("URL to remove not in list"),
        }
        Ok(())
    }

    /// Replace `old` with `new`; the replacement moves to the end
    pub fn edit(&self, old: &str, new: &str) -> StorageResult<()> {
        validate(new)?;
        let mut values = self.list()?;
        let index = values
            .iter()
            .position(|v| v == old)
            .ok_or_else(|| StorageError::NotFound(old.to_string()))?;

        values.remove(index);
        values.push(new.to_string());
        self.write(&values)?;
        info!(path = %self.path.display(), "Edited URL");
        Ok(())
    }

    /// Exchange the positions of two values
    pub fn swap(&self, a: &str, b: &str) -> StorageResult<()> {
        let mut values = self.list()?;
        let position = |value: &str| {
            values
                .iter()
                .position(|v| v == value)
                .ok_or_else(|| StorageError::NotFound(value.to_string()))
        };
        let index_a = position(a)?;
        let index_b = position(b)?;

        values.swap(index_a, index_b);
        self.write(&values)?;
        debug!(index_a, index_b, "Swapped URLs");
        Ok(())
    }

    fn write(&self, values: &[String]) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(&self.path)?;
        for value in values {
            writeln!(file, "{}", value)?;
        }
        file.flush()?;
        Ok(())
    }
}

fn validate(value: &str) -> StorageResult<()> {
    if value.is_empty() || value.contains(['\n', '\r']) {
        return Err(StorageError::InvalidValue(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(validate("otpauth://totp/a").is_ok());
        assert!(validate("").is_err());
        assert!(validate("a\nb").is_err());
    }

    #[test]
    fn test_not_found_display() {
        let err = StorageError::NotFound("x".to_string());
        assert_eq!(err.to_string(), "Not in list: x");
    }
}
