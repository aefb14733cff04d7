//! C1 — Line Source. Reads a plain, gzip, or xz log file and yields one
//! text line at a time with lossy UTF-8 decoding.
//!
//! Grounded on `towl-db/towl/db/events/file_reader.py`'s extension sniffing
//! (`.gz` / `.xz` / plain), rebuilt as a `BufRead` over a boxed reader rather
//! than tracking a raw file descriptor position for a progress bar.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{IngestError, Result};

pub struct LineSource {
    reader: BufReader<Box<dyn Read>>,
    next_line_number: u64,
}

impl LineSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| IngestError::OpenInput {
            path: path.to_path_buf(),
            source,
        })?;
        let inner: Box<dyn Read> = match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Box::new(flate2::read::GzDecoder::new(file)),
            Some("xz") => Box::new(xz2::read::XzDecoder::new(file)),
            _ => Box::new(file),
        };
        Ok(LineSource {
            reader: BufReader::new(inner),
            next_line_number: 0,
        })
    }

    /// Returns `Ok(None)` at end of file. Decode errors are replaced
    /// (lossy), never propagated — per §4.1.
    pub fn next_line(&mut self) -> Result<Option<(u64, String)>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        let line_number = self.next_line_number;
        self.next_line_number += 1;
        Ok(Some((line_number, line)))
    }
}

impl Iterator for LineSource {
    type Item = Result<(u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_line() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &[u8], suffix: &str) -> tempfile::TempPath {
        let mut f = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        f.write_all(contents).unwrap();
        f.into_temp_path()
    }

    #[test]
    fn reads_plain_lines() {
        let path = write_temp(b"alpha\nbeta\ngamma", ".log");
        let mut src = LineSource::open(&path).unwrap();
        assert_eq!(src.next_line().unwrap(), Some((0, "alpha".to_string())));
        assert_eq!(src.next_line().unwrap(), Some((1, "beta".to_string())));
        assert_eq!(src.next_line().unwrap(), Some((2, "gamma".to_string())));
        assert_eq!(src.next_line().unwrap(), None);
    }

    #[test]
    fn reads_gzip_lines() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"one\ntwo\n").unwrap();
        let compressed = enc.finish().unwrap();
        let path = write_temp(&compressed, ".gz");
        let mut src = LineSource::open(&path).unwrap();
        assert_eq!(src.next_line().unwrap(), Some((0, "one".to_string())));
        assert_eq!(src.next_line().unwrap(), Some((1, "two".to_string())));
        assert_eq!(src.next_line().unwrap(), None);
    }

    #[test]
    fn lossy_decodes_invalid_utf8() {
        let path = write_temp(b"ok\xffline\n", ".log");
        let mut src = LineSource::open(&path).unwrap();
        let (_, line) = src.next_line().unwrap().unwrap();
        assert!(line.starts_with("ok"));
    }
}
