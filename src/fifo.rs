use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use nix::{sys::stat::Mode, unistd};
use tracing::debug;

use crate::error::{Error, Result};

/// Single-writer named pipe streaming reference sentences into a decoder
/// child out-of-band.
///
/// Opened read-write on our side so creation doesn't block waiting for the
/// decoder to open its reading end, and so the pipe never sees EOF while
/// the context is alive.
pub struct RefPipe {
    path: PathBuf,
    file: Option<File>,
}

impl RefPipe {
    pub fn create(path: PathBuf) -> Result<Self> {
        unistd::mkfifo(&path, Mode::from_bits_truncate(0o644)).map_err(|source| Error::Fifo {
            path: path.clone(),
            source,
        })?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(path = %path.display(), "reference pipe ready");
        let mut pipe = Self {
            path,
            file: Some(file),
        };
        // The first decode must not learn from a stale reference.
        pipe.write_line("")?;
        Ok(pipe)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `line` plus a newline and flushes immediately. An empty line
    /// tells the decoder's adaptive component not to learn before its next
    /// decode.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| Error::Closed {
            what: "ref.fifo".to_owned(),
        })?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.file.take();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};

    use super::*;

    #[test]
    fn primes_with_an_empty_line_then_streams_references() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fifo");
        let mut pipe = RefPipe::create(path.clone()).unwrap();

        // A writer already exists, so a read-only open doesn't block.
        let mut reader = BufReader::new(File::open(&path).unwrap());
        let mut line = String::new();

        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "\n");

        pipe.write_line("el gato se sienta").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "el gato se sienta\n");

        pipe.close();
    }

    #[test]
    fn write_after_close_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipe = RefPipe::create(dir.path().join("ref.fifo")).unwrap();
        pipe.close();
        assert!(matches!(pipe.write_line("x"), Err(Error::Closed { .. })));
    }
}
