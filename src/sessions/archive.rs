//! In-memory ZIP archives of session images.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AppError;

/// Entry names already used in the archive get an `<n>_` prefix.
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 1;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", n, name);
        n += 1;
    }
    candidate
}

/// Deflates `(name, bytes)` pairs into a single archive.
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, AppError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for (name, bytes) in entries {
        writer.start_file(unique_name(name, &mut used), options)?;
        writer.write_all(bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}
