//! Shared plumbing for the CLI tools: glob expansion, output-folder
//! handling, and overwrite-safe file creation.

use std::fs::{File, OpenOptions};
use std::io::Seek;
use std::path::{Path, PathBuf};

use crate::dtype::SfError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn open_file_overwrite_rw<P: AsRef<Path>>(path: P) -> Result<File, SfError> {
    let mut file = OpenOptions::new()
        .append(false)
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    file.set_len(0)?;
    file.seek(std::io::SeekFrom::Start(0))?;
    Ok(file)
}

/// Expand an input glob into (input, output) path pairs, filtering on the
/// source extension and rewriting the extension for outputs placed in
/// `output_folder`.
pub fn get_input_output_pairs(
    input_glob: &str,
    source_file_format: &str,
    output_folder: &Path,
    change_ext: &str,
) -> Result<Vec<(PathBuf, PathBuf)>, SfError> {
    Ok(glob::glob(input_glob)
        .map_err(|e| SfError::Param(e.to_string()))?
        .filter_map(|entry| match entry {
            Ok(path) => {
                if !valid_file_of_type(&path, source_file_format) {
                    println!("Skipping {}!", path.display());
                    None
                } else {
                    path.file_name().map(|input_file_name| {
                        let mut output_path = output_folder.to_path_buf();
                        output_path.push(input_file_name);
                        output_path.set_extension(change_ext);
                        (path.clone(), output_path)
                    })
                }
            }
            Err(e) => {
                println!("{:?}", e);
                None
            }
        })
        .collect())
}

pub fn get_final_output_folder(output_folder: &Option<PathBuf>) -> Result<PathBuf, SfError> {
    match output_folder {
        Some(custom) => {
            if std::fs::metadata(custom)?.is_dir() {
                Ok(custom.clone())
            } else {
                Err(SfError::Param("output path must be a folder".into()))
            }
        }
        None => Ok(std::env::current_dir()?),
    }
}

pub fn valid_file_of_type<P: AsRef<Path>>(path: P, t: &str) -> bool {
    let Ok(metadata) = std::fs::metadata(&path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(t))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("bank.SF2");
        let skip = dir.path().join("notes.txt");
        std::fs::write(&keep, b"x").unwrap();
        std::fs::write(&skip, b"x").unwrap();
        assert!(valid_file_of_type(&keep, "sf2"));
        assert!(!valid_file_of_type(&skip, "sf2"));
        assert!(!valid_file_of_type(dir.path(), "sf2"));
    }

    #[test]
    fn pairs_rewrite_extension_into_output_folder() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sf2"), b"x").unwrap();
        std::fs::write(dir.path().join("b.sf2"), b"x").unwrap();
        let pattern = format!("{}/*.sf2", dir.path().display());
        let pairs = get_input_output_pairs(&pattern, "sf2", out.path(), "xml").unwrap();
        assert_eq!(pairs.len(), 2);
        for (_, output) in pairs {
            assert_eq!(output.extension().unwrap(), "xml");
            assert!(output.starts_with(out.path()));
        }
    }
}
