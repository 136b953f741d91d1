//! Entry sinks: extract to disk or collect in memory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::EntrySink;

/// Buffer size for copying entry content (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Progress notifications emitted by [`DiskSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackEvent<'a> {
    /// An entry is about to be written.
    Entry { name: &'a str, size: u64 },
    /// A chunk of an entry was written.
    Write { name: &'a str, bytes: usize },
}

/// Writes each entry to `<root>/<name>`, creating parent directories.
///
/// Every file created is remembered so a failed extraction can be rolled
/// back by the caller.
pub struct DiskSink<'a> {
    root: PathBuf,
    written: Vec<PathBuf>,
    on_event: Option<Box<dyn FnMut(UnpackEvent<'_>) + 'a>>,
}

impl<'a> DiskSink<'a> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Vec::new(),
            on_event: None,
        }
    }

    /// Registers a progress callback.
    pub fn with_progress(mut self, on_event: impl FnMut(UnpackEvent<'_>) + 'a) -> Self {
        self.on_event = Some(Box::new(on_event));
        self
    }

    /// Files created so far, in extraction order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn emit(&mut self, event: UnpackEvent<'_>) {
        if let Some(cb) = self.on_event.as_mut() {
            cb(event);
        }
    }

    fn target(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to write entry outside the target directory: {name:?}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl EntrySink for DiskSink<'_> {
    fn accept(&mut self, name: &str, size: u64, reader: &mut dyn Read) -> io::Result<()> {
        let path = self.target(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        self.emit(UnpackEvent::Entry { name, size });

        let file = File::create(&path)?;
        self.written.push(path);

        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buffer[..bytes_read])?;
            self.emit(UnpackEvent::Write {
                name,
                bytes: bytes_read,
            });
        }
        writer.flush()
    }
}

impl std::fmt::Debug for DiskSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskSink")
            .field("root", &self.root)
            .field("written", &self.written.len())
            .finish()
    }
}

/// Collects entries in memory, keyed by (transformed) name.
///
/// Used to read a manifest out of an archive without touching disk.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content of the entry named `name`, if it was delivered.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> HashMap<String, Vec<u8>> {
        self.files
    }
}

impl EntrySink for MemorySink {
    fn accept(&mut self, name: &str, size: u64, reader: &mut dyn Read) -> io::Result<()> {
        let mut content = Vec::with_capacity(size.min(BUFFER_SIZE as u64 * 16) as usize);
        reader.read_to_end(&mut content)?;
        self.files.insert(name.to_string(), content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_disk_sink_creates_parents() {
        let temp = TempDir::new().unwrap();
        let mut sink = DiskSink::new(temp.path().join("entry"));

        sink.accept("nested/a.json", 2, &mut Cursor::new(b"{}".to_vec()))
            .unwrap();

        let path = temp.path().join("entry/nested/a.json");
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert_eq!(sink.written(), &[path]);
    }

    #[test]
    fn test_disk_sink_reports_progress() {
        let temp = TempDir::new().unwrap();
        let mut events = Vec::new();
        {
            let mut sink = DiskSink::new(temp.path()).with_progress(|event| match event {
                UnpackEvent::Entry { name, size } => events.push(format!("entry {name} {size}")),
                UnpackEvent::Write { name, bytes } => events.push(format!("write {name} {bytes}")),
            });
            sink.accept("a.json", 5, &mut Cursor::new(b"hello".to_vec()))
                .unwrap();
        }
        assert_eq!(events, vec!["entry a.json 5", "write a.json 5"]);
    }

    #[test]
    fn test_disk_sink_rejects_escaping_names() {
        let temp = TempDir::new().unwrap();
        let mut sink = DiskSink::new(temp.path().join("entry"));

        for name in ["../evil.json", "/etc/passwd", ""] {
            let err = sink
                .accept(name, 0, &mut Cursor::new(Vec::new()))
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert!(sink.written().is_empty());
        assert!(!temp.path().join("evil.json").exists());
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::new();
        sink.accept("package.json", 2, &mut Cursor::new(b"{}".to_vec()))
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("package.json"), Some(&b"{}"[..]));
        assert!(sink.get("missing.json").is_none());
        assert_eq!(sink.into_files().len(), 1);
    }
}
