//! Resume file rewriting.
//!
//! Epistemic foundation:
//! - K_i: The original job file is preserved under `<name>.plr` until the job ends
//! - K_i: The rewritten file = preamble + sentinel + current file bytes from the cut
//! - B_i: Any step may fail → the scoped transaction puts the current file back
//! - I^B: An existing `.plr` backup means the job was already resumed → the
//!   checkpoint offset refers to the resume file, so splice that and keep the backup

use crate::models::{PlrError, Result, Snapshot};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix marking a recovery backup of a job file.
pub const BACKUP_SUFFIX: &str = ".plr";

/// Line separating the restoration preamble from resumed job content.
pub const RESUME_SENTINEL: &str = ";;;;; PLR_RESUME - PRINT GCODE STARTS ;;;;;";

/// Backup path for a job file: `<file>.plr`.
pub fn backup_path(original: &Path) -> PathBuf {
    let mut name = original.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Machine context the preamble restores before resumed content runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeContext {
    pub active_tool: String,
    pub chamber_temp: f64,
    pub z: f64,
}

impl From<&Snapshot> for ResumeContext {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            active_tool: snapshot.active_tool.clone(),
            chamber_temp: snapshot.chamber_temp,
            z: snapshot.position.z,
        }
    }
}

/// Suffix of the previous resume file while a repeated resume rewrites it.
pub const PREVIOUS_SUFFIX: &str = ".plr.prev";

fn previous_path(original: &Path) -> PathBuf {
    let mut name = original.as_os_str().to_owned();
    name.push(PREVIOUS_SUFFIX);
    PathBuf::from(name)
}

/// Scoped backup/swap of a job file.
///
/// `begin` moves the current file aside; `commit` keeps the new file.
/// Dropping an uncommitted transaction removes the partial file and moves
/// the current file back, restoring the pre-call state.
///
/// On a first resume the current file becomes the `.plr` backup. When a
/// backup already exists the current file is an earlier resume file: it is
/// read from a `.plr.prev` copy and discarded on commit, and the backup of
/// the real original is left alone.
pub struct RewriteTransaction {
    original: PathBuf,
    backup: PathBuf,
    source: PathBuf,
    finished: bool,
}

impl RewriteTransaction {
    pub fn begin(original: &Path) -> Result<Self> {
        if !original.is_file() {
            return Err(PlrError::FileNotFound(original.to_path_buf()));
        }

        let backup = backup_path(original);
        let source = if backup.exists() {
            let previous = previous_path(original);
            fs::rename(original, &previous)
                .map_err(|e| PlrError::io("moving previous resume file aside", e))?;
            info!(
                backup = %backup.display(),
                "Job file was already resumed, keeping original backup"
            );
            previous
        } else {
            fs::rename(original, &backup)
                .map_err(|e| PlrError::io("renaming job file to backup", e))?;
            debug!(backup = %backup.display(), "Job file moved to backup");
            backup.clone()
        };

        Ok(Self {
            original: original.to_path_buf(),
            backup,
            source,
            finished: false,
        })
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Create the new file under the original name.
    pub fn create_output(&self) -> Result<File> {
        File::create(&self.original).map_err(|e| PlrError::io("creating resume file", e))
    }

    /// The file the checkpointed offset refers to.
    pub fn open_source(&self) -> Result<File> {
        File::open(&self.source).map_err(|e| PlrError::io("opening job source", e))
    }

    /// Keep the rewritten file; the backup stays until the job ends.
    pub fn commit(mut self) -> PathBuf {
        self.finished = true;
        if self.source != self.backup {
            if let Err(e) = fs::remove_file(&self.source) {
                warn!(path = %self.source.display(), error = %e, "Removing previous resume file failed");
            }
        }
        debug!(path = %self.original.display(), "Rewrite committed");
        std::mem::take(&mut self.original)
    }

    fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        if self.original.exists() {
            fs::remove_file(&self.original)
                .map_err(|e| PlrError::io("removing partial resume file", e))?;
        }
        if self.source.exists() {
            fs::rename(&self.source, &self.original)
                .map_err(|e| PlrError::io("restoring job file", e))?;
        }
        Ok(())
    }
}

impl Drop for RewriteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(path = %self.original.display(), "Rewrite not committed, rolling back");
        if let Err(e) = self.rollback() {
            warn!(error = %e, "Rollback of resume file failed");
        }
    }
}

/// Destination of a resume file: written, then made durable.
pub trait ResumeSink: Write {
    fn sync(&self) -> std::io::Result<()>;
}

impl ResumeSink for File {
    fn sync(&self) -> std::io::Result<()> {
        self.sync_all()
    }
}

/// Builds resume files from a job file and a byte offset.
#[derive(Debug, Clone, Default)]
pub struct ResumeRewriter {
    chamber_heater: Option<String>,
    restart_lines: Vec<String>,
}

impl ResumeRewriter {
    pub fn new(chamber_heater: Option<String>, restart_lines: Vec<String>) -> Self {
        Self {
            chamber_heater,
            restart_lines,
        }
    }

    /// Replace `original` with a resume file starting at `offset`.
    ///
    /// Returns the path of the new file (same as `original`).
    pub fn rewrite(&self, original: &Path, offset: u64, context: &ResumeContext) -> Result<PathBuf> {
        self.rewrite_into(original, offset, context, RewriteTransaction::create_output)
    }

    fn rewrite_into<S, F>(
        &self,
        original: &Path,
        offset: u64,
        context: &ResumeContext,
        create: F,
    ) -> Result<PathBuf>
    where
        S: ResumeSink,
        F: FnOnce(&RewriteTransaction) -> Result<S>,
    {
        let tx = RewriteTransaction::begin(original)?;

        let reader = BufReader::new(tx.open_source()?);
        let mut writer = BufWriter::new(create(&tx)?);
        let copied = self.write_resume(&mut writer, reader, offset, context)?;
        writer
            .flush()
            .map_err(|e| PlrError::io("flushing resume file", e))?;
        writer
            .get_ref()
            .sync()
            .map_err(|e| PlrError::io("syncing resume file", e))?;
        drop(writer);

        let path = tx.commit();
        info!(
            path = %path.display(),
            offset,
            copied_bytes = copied,
            "Resume file created"
        );
        Ok(path)
    }

    /// Preamble lines, in execution order.
    pub fn preamble(&self, context: &ResumeContext) -> Vec<String> {
        let mut lines = vec![format!("ACTIVATE_EXTRUDER EXTRUDER={}", context.active_tool)];
        if let Some(heater) = self.chamber_heater.as_deref() {
            if context.chamber_temp > 0.0 {
                lines.push(format!(
                    "SET_HEATER_TEMPERATURE HEATER={heater} TARGET={:.1}",
                    context.chamber_temp
                ));
            }
        }
        lines.push(format!("G1 Z{:.3} F3000 ; Restore Z height", context.z));
        lines.extend(self.restart_lines.iter().cloned());
        lines
    }

    /// Write preamble, sentinel and spliced body. Returns body bytes copied.
    fn write_resume<W: Write, R: BufRead>(
        &self,
        out: &mut W,
        backup: R,
        offset: u64,
        context: &ResumeContext,
    ) -> Result<u64> {
        for line in self.preamble(context) {
            writeln!(out, "{line}").map_err(|e| PlrError::io("writing resume preamble", e))?;
        }
        writeln!(out, "{RESUME_SENTINEL}").map_err(|e| PlrError::io("writing resume sentinel", e))?;
        splice_from_offset(backup, out, offset)
    }
}

/// Copy `reader` to `out` starting with the first line not fully before `offset`.
///
/// Lines ending at or before `offset` were already executed and are skipped.
/// A line straddling the cut is copied whole, then everything after it
/// byte-for-byte.
pub fn splice_from_offset<R: BufRead, W: Write>(mut reader: R, out: &mut W, offset: u64) -> Result<u64> {
    let mut consumed: u64 = 0;
    let mut copied: u64 = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| PlrError::io("reading job backup", e))?;
        if n == 0 {
            break;
        }
        consumed += n as u64;
        if consumed <= offset {
            continue;
        }
        out.write_all(&line)
            .map_err(|e| PlrError::io("writing resume body", e))?;
        copied += n as u64;
    }

    Ok(copied)
}

/// Move `<dir>/<filename>.plr` back over `<dir>/<filename>`.
///
/// Returns whether a backup was restored. Names already carrying the backup
/// suffix are ignored.
pub fn restore_original(dir: &Path, filename: &str) -> Result<bool> {
    if filename.ends_with(BACKUP_SUFFIX) {
        debug!(filename, "Already a backup name, not restoring");
        return Ok(false);
    }

    let original = dir.join(filename);
    let backup = backup_path(&original);
    if !backup.exists() {
        return Ok(false);
    }

    if original.exists() {
        fs::remove_file(&original).map_err(|e| PlrError::io("removing resume file", e))?;
    }
    fs::rename(&backup, &original).map_err(|e| PlrError::io("restoring original job file", e))?;
    info!(path = %original.display(), "Restored original job file");
    Ok(true)
}
