use std::io::Write;

use serde_json::Value;

use crate::errors::GenerationError;

/// Writes one JSON document per line.
pub struct NdjsonWriter<W: Write> {
    inner: W,
    lines: u64,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, lines: 0 }
    }

    pub fn write_item(&mut self, item: &Value) -> Result<(), GenerationError> {
        serde_json::to_writer(&mut self.inner, item)?;
        self.inner.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, GenerationError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn writes_one_line_per_item() {
        let mut writer = NdjsonWriter::new(Vec::new());
        writer.write_item(&json!({"id": 1})).expect("write");
        writer.write_item(&json!({"id": 2, "tags": ["a"]})).expect("write");
        assert_eq!(writer.lines(), 2);
        let bytes = writer.finish().expect("finish");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            "{\"id\":1}\n{\"id\":2,\"tags\":[\"a\"]}\n"
        );
    }
}
