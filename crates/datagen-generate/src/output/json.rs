use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dataset::Dataset;
use crate::errors::GenerationError;

/// Write the dataset as one pretty-printed JSON object of final name to
/// item array.
pub fn write_dataset_json(path: &Path, dataset: &Dataset) -> Result<(), GenerationError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, dataset)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
