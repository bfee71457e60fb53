//! Directory-backed outbox.
//!
//! # File Format
//! Each generation is a newline-delimited JSON file:
//! ```text
//! gen-00000001.ndjson.ready   (sealed)
//! gen-00000002.ndjson.ready   (sealed)
//! gen-00000003.ndjson         (open)
//! ```
//! Sealing is a rename. A process that dies with an open generation on disk
//! resumes appending to it on the next open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{GenerationId, Outbox};
use crate::error::StorageError;
use crate::sender::Record;

const PREFIX: &str = "gen-";
const OPEN_SUFFIX: &str = ".ndjson";
const SEALED_SUFFIX: &str = ".ndjson.ready";

/// Durability settings for [`FileOutbox`].
#[derive(Debug, Clone, Default)]
pub struct OutboxConfig {
    /// Fsync after every appended record.
    pub sync_on_write: bool,
}

struct OpenGeneration {
    seq: u64,
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

/// [`Outbox`] persisted as one file per generation in a directory.
pub struct FileOutbox {
    dir: PathBuf,
    config: OutboxConfig,
    open: Mutex<OpenGeneration>,
}

impl std::fmt::Debug for FileOutbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOutbox")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn open_name(seq: u64) -> String {
    format!("{PREFIX}{seq:08}{OPEN_SUFFIX}")
}

fn sealed_name(seq: u64) -> String {
    format!("{PREFIX}{seq:08}{SEALED_SUFFIX}")
}

/// Parses the sequence number out of a generation file name.
fn parse_name(name: &str) -> Option<(u64, bool)> {
    let rest = name.strip_prefix(PREFIX)?;
    if let Some(seq) = rest.strip_suffix(SEALED_SUFFIX) {
        return seq.parse().ok().map(|s| (s, true));
    }
    rest.strip_suffix(OPEN_SUFFIX)?.parse().ok().map(|s| (s, false))
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Opens a generation left by a previous process for appending.
///
/// Returns the writer and the number of non-empty lines. A torn final line
/// is terminated so the next record starts on a line of its own.
fn resume(path: &Path) -> Result<(BufWriter<File>, usize), StorageError> {
    let contents = fs::read(path)?;
    let records = contents
        .split(|b| *b == b'\n')
        .filter(|l| !is_blank(l))
        .count();
    let mut writer = append_writer(path)?;
    if !contents.is_empty() && contents.last() != Some(&b'\n') {
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok((writer, records))
}

fn append_writer(path: &Path) -> Result<BufWriter<File>, StorageError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl FileOutbox {
    /// Opens the outbox in `dir`, creating the directory if needed.
    ///
    /// An open generation left by a previous process is resumed. If several
    /// are found (which only happens after an interrupted seal), all but the
    /// newest are sealed.
    ///
    /// # Errors
    /// Returns an I/O error if the directory cannot be created or scanned.
    pub fn open(dir: impl Into<PathBuf>, config: OutboxConfig) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut max_seq = 0u64;
        let mut open_seqs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some((seq, sealed)) = parse_name(&name) {
                max_seq = max_seq.max(seq);
                if !sealed {
                    open_seqs.push(seq);
                }
            }
        }
        open_seqs.sort_unstable();

        let resumed = open_seqs.pop();
        for seq in open_seqs {
            let from = dir.join(open_name(seq));
            warn!(generation = seq, "sealing orphaned open generation");
            fs::rename(&from, dir.join(sealed_name(seq)))?;
        }

        let open = match resumed {
            Some(seq) => {
                let path = dir.join(open_name(seq));
                let (writer, records) = resume(&path)?;
                info!(generation = seq, records, "resuming open outbox generation");
                OpenGeneration {
                    seq,
                    path,
                    writer,
                    records,
                }
            }
            None => {
                let seq = max_seq + 1;
                let path = dir.join(open_name(seq));
                OpenGeneration {
                    seq,
                    writer: append_writer(&path)?,
                    path,
                    records: 0,
                }
            }
        };

        Ok(Self {
            dir,
            config,
            open: Mutex::new(open),
        })
    }

    /// Directory holding the generation files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<MutexGuard<'_, OpenGeneration>, StorageError> {
        self.open
            .lock()
            .map_err(|_| StorageError::Backend("outbox lock poisoned".to_string()))
    }

    fn sealed_path(&self, id: &GenerationId) -> Result<PathBuf, StorageError> {
        match parse_name(id.as_str()) {
            Some((_, true)) => Ok(self.dir.join(id.as_str())),
            _ => Err(StorageError::Backend(format!("not a sealed generation id: {id}"))),
        }
    }
}

impl Outbox for FileOutbox {
    fn write_record(&self, record: &Record) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StorageError::Serialization(format!("record encoding failed: {e}")))?;
        line.push(b'\n');

        let mut open = self.lock()?;
        open.writer.write_all(&line)?;
        open.writer.flush()?;
        if self.config.sync_on_write {
            open.writer.get_ref().sync_all()?;
        }
        open.records += 1;
        Ok(())
    }

    fn seal_current_generation(&self) -> Result<Option<GenerationId>, StorageError> {
        let mut open = self.lock()?;
        if open.records == 0 {
            return Ok(None);
        }
        open.writer.flush()?;
        open.writer.get_ref().sync_all()?;

        let next_seq = open.seq + 1;
        let next_path = self.dir.join(open_name(next_seq));
        let next_writer = append_writer(&next_path)?;

        let sealed = sealed_name(open.seq);
        if let Err(e) = fs::rename(&open.path, self.dir.join(&sealed)) {
            let _ = fs::remove_file(&next_path);
            return Err(e.into());
        }

        let previous = std::mem::replace(
            &mut *open,
            OpenGeneration {
                seq: next_seq,
                path: next_path,
                writer: next_writer,
                records: 0,
            },
        );
        debug!(generation = %sealed, records = previous.records, "sealed outbox generation");
        Ok(Some(GenerationId::new(sealed)))
    }

    fn list_sealed_generations(&self) -> Result<Vec<GenerationId>, StorageError> {
        let mut sealed = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some((seq, true)) = parse_name(&name) {
                sealed.push((seq, name));
            }
        }
        sealed.sort_unstable();
        Ok(sealed.into_iter().map(|(_, name)| GenerationId::new(name)).collect())
    }

    fn read_generation(&self, id: &GenerationId) -> Result<Vec<Record>, StorageError> {
        let path = self.sealed_path(id)?;
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in contents.split(|b| *b == b'\n').enumerate() {
            if is_blank(line) {
                continue;
            }
            match serde_json::from_slice::<Record>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(generation = %id, line = index + 1, error = %e, "skipping undecodable outbox record"),
            }
        }
        Ok(records)
    }

    fn delete_generation(&self, id: &GenerationId) -> Result<(), StorageError> {
        let path = self.sealed_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
