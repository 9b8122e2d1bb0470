//! Comment files and on-disk exports
//!
//! Comment files hold one line of free text per instruction slot; line `i`
//! annotates the instruction at address `i * 8`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use vu_tracer::{Snapshot, TraceSession};

/// Per-instruction comments backed by a text file
#[derive(Debug, Clone)]
pub struct CommentFile {
    path: PathBuf,
    comments: Vec<String>,
    loaded: bool,
}

impl CommentFile {
    /// Read comments from `path`
    ///
    /// Lines past `slot_count` are ignored; missing lines are empty comments.
    pub fn load(path: impl Into<PathBuf>, slot_count: usize) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open comment file {}", path.display()))?;

        let mut comments = vec![String::new(); slot_count];
        for (slot, line) in comments.iter_mut().zip(BufReader::new(file).lines()) {
            *slot = line.with_context(|| format!("Failed to read {}", path.display()))?;
        }

        tracing::info!("Loaded comments from {}", path.display());
        Ok(Self {
            path,
            comments,
            loaded: true,
        })
    }

    /// Load `path` if possible, otherwise start with read-only empty comments
    pub fn open(path: impl Into<PathBuf>, slot_count: usize) -> Self {
        let path = path.into();
        match Self::load(path.clone(), slot_count) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("{:#}. Comments are read-only.", e);
                Self {
                    path,
                    comments: vec![String::new(); slot_count],
                    loaded: false,
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Comments are editable only once a file was successfully loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Comment of instruction slot `slot` (empty if none)
    pub fn get(&self, slot: usize) -> &str {
        self.comments.get(slot).map_or("", String::as_str)
    }

    /// Replace a comment; returns false when read-only or out of range
    pub fn set(&mut self, slot: usize, text: impl Into<String>) -> bool {
        if !self.loaded {
            return false;
        }
        match self.comments.get_mut(slot) {
            Some(comment) => {
                *comment = text.into();
                true
            }
            None => false,
        }
    }

    /// Write every slot's comment back to the file, one per line
    pub fn save(&self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create comment file {}", self.path.display()))?;
        let mut out = BufWriter::new(file);
        for comment in &self.comments {
            writeln!(out, "{}", comment)?;
        }
        out.flush()?;
        tracing::debug!("Saved {} comments to {}", self.comments.len(), self.path.display());
        Ok(())
    }
}

/// Write one disassembly line per instruction slot, with `; comment` appended
pub fn write_disassembly<W: Write>(
    session: &TraceSession,
    comments: Option<&CommentFile>,
    out: &mut W,
) -> Result<()> {
    for (slot, insn) in session.instructions().iter().enumerate() {
        let comment = comments.map_or("", |c| c.get(slot));
        if comment.is_empty() {
            writeln!(out, "{}", insn.disassembly)?;
        } else {
            writeln!(out, "{}; {}", insn.disassembly, comment)?;
        }
    }
    Ok(())
}

/// Export the annotated disassembly listing to `path`
pub fn export_disassembly(
    session: &TraceSession,
    comments: Option<&CommentFile>,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create disassembly file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_disassembly(session, comments, &mut out)?;
    out.flush()?;
    tracing::info!("Exported disassembly to {}", path.display());
    Ok(())
}

/// Dump a snapshot's data memory image as raw bytes
pub fn dump_memory(snapshot: &Snapshot, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, snapshot.memory.as_slice())
        .with_context(|| format!("Failed to write memory dump {}", path.display()))?;
    tracing::info!("Wrote {} byte memory dump to {}", snapshot.memory.len(), path.display());
    Ok(())
}
