//! Input discovery for batch runs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DialogueError;

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Conversation files named by `input`.
///
/// A file is returned as-is if it has a `.json` extension. A directory is
/// scanned, not recursively, for `.json` files, returned in sorted order.
pub fn find_input_files<P: AsRef<Path>>(input: P) -> Result<Vec<PathBuf>, DialogueError> {
    let input = input.as_ref();
    let metadata = fs::metadata(input).map_err(|e| DialogueError::io(input, e))?;

    if metadata.is_file() {
        if !is_json(input) {
            return Err(DialogueError::Config(format!(
                "Input file {} is not a .json file",
                input.display()
            )));
        }
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(input).map_err(|e| DialogueError::io(input, e))? {
        let path = entry.map_err(|e| DialogueError::io(input, e))?.path();
        if path.is_file() && is_json(&path) {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(DialogueError::Config(format!(
            "No .json files found in {}",
            input.display()
        )));
    }

    files.sort();
    Ok(files)
}
