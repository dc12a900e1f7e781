//! Local mailbox directories (`in/`, `out/`, `sent/`), one message per file.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    In,
    Out,
    Sent,
}

impl Folder {
    fn dir_name(self) -> &'static str {
        match self {
            Folder::In => "in",
            Folder::Out => "out",
            Folder::Sent => "sent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    base: PathBuf,
}

impl Mailbox {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn path(&self, folder: Folder) -> PathBuf {
        self.base.join(folder.dir_name())
    }

    /// Message files in `folder`. A folder that does not exist yet is empty.
    fn messages(&self, folder: Folder) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.path(folder)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    pub fn count(&self, folder: Folder) -> io::Result<usize> {
        Ok(self.messages(folder)?.len())
    }

    /// Delete every message in `folder`, returning how many went.
    pub fn clear(&self, folder: Folder) -> io::Result<usize> {
        let files = self.messages(folder)?;
        for file in &files {
            fs::remove_file(file)?;
        }
        if !files.is_empty() {
            tracing::debug!("Removed {} message(s) from {}", files.len(), self.path(folder).display());
        }
        Ok(files.len())
    }

    /// Subject lines of every message in `folder`.
    pub fn subjects(&self, folder: Folder) -> io::Result<HashSet<String>> {
        let mut subjects = HashSet::new();
        for file in self.messages(folder)? {
            let raw = fs::read(&file)?;
            if let Some(subject) = header_subject(&String::from_utf8_lossy(&raw)) {
                subjects.insert(subject);
            }
        }
        Ok(subjects)
    }
}

/// The Subject header of a message, searching only the header block.
fn header_subject(message: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^subject:\s*(.*?)\s*$").unwrap());

    message
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
