//! Zip packaging of the working directory.

use std::fs::File;
use std::io::{copy, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use diag_common::{DiagError, DiagResult};

/// Zip every file under `working_dir` into `archive_path`, preserving
/// paths relative to `working_dir`. Entry order is sorted for a
/// deterministic archive. Returns the number of files written.
pub fn pack(working_dir: &Path, archive_path: &Path) -> DiagResult<usize> {
    let mut files = Vec::new();
    walk(working_dir, &mut files)?;
    files.sort();

    let archive = File::create(archive_path).map_err(|err| {
        DiagError::resource(
            "create",
            archive_path.display().to_string(),
            err.to_string(),
        )
    })?;
    let mut writer = ZipWriter::new(BufWriter::new(archive));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in &files {
        let relative = path
            .strip_prefix(working_dir)
            .map_err(|err| {
                DiagError::resource("relativize", path.display().to_string(), err.to_string())
            })?
            .to_string_lossy()
            .replace('\\', "/");
        debug!(entry = %relative, "Adding archive entry");
        writer.start_file(relative.as_str(), options).map_err(|err| {
            DiagError::resource("zip", relative.clone(), err.to_string())
        })?;
        let file = File::open(path).map_err(|err| {
            DiagError::resource("open", path.display().to_string(), err.to_string())
        })?;
        copy(&mut BufReader::new(file), &mut writer).map_err(|err| {
            DiagError::resource("zip", relative.clone(), err.to_string())
        })?;
    }

    writer.finish().map_err(|err| {
        DiagError::resource(
            "finish",
            archive_path.display().to_string(),
            err.to_string(),
        )
    })?;

    info!(
        archive = %archive_path.display(),
        files = files.len(),
        "Bundle archive written"
    );
    Ok(files.len())
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> DiagResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        DiagError::resource("read dir", dir.display().to_string(), err.to_string())
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| {
            DiagError::resource("read dir", dir.display().to_string(), err.to_string())
        })?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
