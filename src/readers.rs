//! Opens one configured input (a file path or the `-` stdin sentinel) as a
//! buffered line source. The parser drives one source at a time on its own
//! thread (SPEC_FULL.md §5 "one parser thread"), so nothing here needs to be
//! `Send` across worker boundaries.

use std::io::{self, BufRead};

use anyhow::{Context, Result};

use crate::decompression::{self, DecompressionReader};

/// One input source: an optional filename (`None` for stdin) and a buffered,
/// already-decompressed byte stream.
pub struct InputSource {
    pub filename: Option<String>,
    reader: Box<dyn BufRead>,
}

impl InputSource {
    pub fn open(path: &str) -> Result<Self> {
        if path == "-" {
            let reader = decompression::maybe_decompress_stdin(io::stdin())
                .context("failed to read from stdin")?;
            Ok(Self { filename: None, reader })
        } else {
            let reader = DecompressionReader::new(path)
                .with_context(|| format!("failed to open '{path}'"))?;
            Ok(Self {
                filename: Some(path.to_string()),
                reader: Box::new(reader),
            })
        }
    }

    /// Read one line with the trailing `\n`/`\r\n` stripped. `Ok(None)` at EOF.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.ends_with('\n') {
            buf.pop();
            if buf.ends_with('\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_lines_without_trailing_newline() -> Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        writeln!(temp_file, "line1")?;
        writeln!(temp_file, "line2")?;
        temp_file.flush()?;

        let mut source = InputSource::open(temp_file.path().to_str().unwrap())?;
        assert_eq!(source.read_line()?, Some("line1".to_string()));
        assert_eq!(source.read_line()?, Some("line2".to_string()));
        assert_eq!(source.read_line()?, None);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(InputSource::open("/nonexistent/path/to/a/log/file").is_err());
    }
}
