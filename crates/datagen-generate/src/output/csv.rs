use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::dataset::Dataset;
use crate::errors::GenerationError;

/// Write one CSV file per collection into `dir`, named `<name>.csv`.
/// Returns the paths written and the total byte count.
pub fn write_dataset_csv(
    dir: &Path,
    dataset: &Dataset,
) -> Result<(Vec<PathBuf>, u64), GenerationError> {
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::new();
    let mut bytes = 0_u64;
    for collection in dataset.collections() {
        let path = dir.join(format!("{}.csv", collection.name));
        bytes += write_collection_csv(&path, &collection.items)?;
        paths.push(path);
    }
    Ok((paths, bytes))
}

/// Write items as CSV. The header is the union of top-level keys in
/// first-seen order; nested values are written as JSON text and nulls as
/// empty cells.
pub fn write_collection_csv(path: &Path, items: &[Value]) -> Result<u64, GenerationError> {
    let writer = BufWriter::new(File::create(path)?);
    let counting = CountingWriter::new(writer);
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(counting);

    let header = header(items)?;
    writer.write_record(&header)?;

    for item in items {
        let record = header
            .iter()
            .map(|key| cell(item.get(key.as_str())))
            .collect::<Result<Vec<_>, _>>()?;
        writer.write_record(&record)?;
    }

    writer.flush()?;
    let counting = writer
        .into_inner()
        .map_err(|err| GenerationError::Io(err.into_error()))?;
    Ok(counting.bytes_written())
}

fn header(items: &[Value]) -> Result<Vec<String>, GenerationError> {
    let mut header: Vec<String> = Vec::new();
    for item in items {
        let Value::Object(object) = item else {
            return Err(GenerationError::Serialization(
                "CSV output requires object items".to_string(),
            ));
        };
        for key in object.keys() {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
    }
    Ok(header)
}

fn cell(value: Option<&Value>) -> Result<String, GenerationError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Bool(flag)) => Ok(flag.to_string()),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(nested) => serde_json::to_string(nested)
            .map_err(|err| GenerationError::Serialization(err.to_string())),
    }
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cells_flatten_nested_values() {
        assert_eq!(cell(None).expect("cell"), "");
        assert_eq!(cell(Some(&json!(null))).expect("cell"), "");
        assert_eq!(cell(Some(&json!("a,b"))).expect("cell"), "a,b");
        assert_eq!(cell(Some(&json!(1.5))).expect("cell"), "1.5");
        assert_eq!(
            cell(Some(&json!({"city": "Porto"}))).expect("cell"),
            r#"{"city":"Porto"}"#
        );
    }

    #[test]
    fn header_is_union_in_first_seen_order() {
        let items = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "email": "x"})];
        assert_eq!(
            header(&items).expect("header"),
            vec!["id".to_string(), "name".to_string(), "email".to_string()]
        );
        assert!(header(&[json!(1)]).is_err());
    }
}
