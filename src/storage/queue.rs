//! Directory of partially delivered events
//!
//! One file per record, written owner-only. Records are listed in name order,
//! and names start with the UNIX timestamp, so replay is oldest first.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, trace};

use super::error::{StorageError, StorageResult};
use super::record;
use crate::event::EventSnapshot;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

#[derive(Debug)]
pub struct EventQueue {
    dir: PathBuf,
    /// Maximum number of records; `None` means unbounded
    slots: Option<usize>,
    sequence: u64,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl EventQueue {
    pub fn new(dir: impl Into<PathBuf>, slots: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            slots,
            sequence: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> StorageResult<()> {
        if self.dir.is_dir() {
            return Ok(());
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_MODE);
        builder
            .create(&self.dir)
            .map_err(|e| StorageError::io(&self.dir, e))?;

        #[cfg(unix)]
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(DIR_MODE))
            .map_err(|e| StorageError::io(&self.dir, e))?;

        debug!("created event queue directory {}", self.dir.display());
        Ok(())
    }

    fn next_file_name(&mut self, event: &EventSnapshot) -> PathBuf {
        self.sequence += 1;
        self.dir.join(format!(
            "{}_{}_{}_{:06}",
            Utc::now().timestamp(),
            sanitize(&event.source),
            event.kind,
            self.sequence
        ))
    }

    fn write(path: &Path, event: &EventSnapshot) -> StorageResult<()> {
        let data = record::encode(event)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(path).map_err(|e| StorageError::io(path, e))?;
        file.write_all(&data)
            .map_err(|e| StorageError::io(path, e))
    }

    /// Persist a new record; fails when the queue is over quota
    pub fn add(&mut self, event: &EventSnapshot) -> StorageResult<PathBuf> {
        self.ensure_dir()?;

        if let Some(slots) = self.slots {
            if self.pending()?.len() >= slots {
                return Err(StorageError::QuotaExceeded { slots });
            }
        }

        let path = self.next_file_name(event);
        debug!("adding event to the queue file {} for later delivery", path.display());
        Self::write(&path, event)?;
        Ok(path)
    }

    /// Rewrite an existing record with the current delivery flags
    pub fn update(&self, path: &Path, event: &EventSnapshot) -> StorageResult<()> {
        debug!("updating queued event {}", path.display());
        Self::write(path, event)
    }

    /// Regular files in the queue directory, oldest first
    pub fn pending(&self) -> StorageResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.dir, e))?;
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => files.push(entry.path()),
                _ => trace!("ignoring queue entry {}", entry.path().display()),
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn load(&self, path: &Path) -> StorageResult<EventSnapshot> {
        let data = fs::read(path).map_err(|e| StorageError::io(path, e))?;
        record::decode(&data)
    }

    pub fn remove(&self, path: &Path) -> StorageResult<()> {
        debug!("removing queued event {}", path.display());
        fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }
}
