use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Opens a plain or gzipped text file for line reading.
/// Concatenated gzip members (e.g. `cat a.gz b.gz`) are read through.
pub fn open_text_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gzipped(path)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}


/// Lexically normalizes a path: drops `.` and folds `..` into its parent.
/// Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}


/// Makes `path` absolute by joining it onto `base_dir` when relative.
///
/// # Arguments
/// * `path` - Path as written by the user.
/// * `base_dir` - Directory relative paths are anchored to.
///
/// # Returns
/// Normalized absolute path.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base_dir.join(path))
    }
}


fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}


/// True when every output exists and none is older than the newest input.
/// An input that cannot be stat'ed forces a rerun.
pub fn is_up_to_date(inputs: &[PathBuf], outputs: &[PathBuf]) -> bool {
    if outputs.is_empty() {
        return false;
    }

    let mut oldest_output: Option<SystemTime> = None;
    for output in outputs {
        match modified(output) {
            Some(t) => {
                oldest_output = Some(oldest_output.map_or(t, |o| o.min(t)));
            }
            None => return false,
        }
    }

    let mut newest_input: Option<SystemTime> = None;
    for input in inputs {
        match modified(input) {
            Some(t) => {
                newest_input = Some(newest_input.map_or(t, |n| n.max(t)));
            }
            None => return false,
        }
    }

    match (oldest_output, newest_input) {
        (Some(out), Some(inp)) => out >= inp,
        (Some(_), None) => true,
        _ => false,
    }
}


/// Creates the parent directory of every path given.
pub fn ensure_parent_dirs<'a, I>(paths: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for path in paths {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}


/// Removes whatever a failed stage left behind, so a rerun does not mistake it for finished work.
pub fn remove_partial_outputs(outputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for output in outputs {
        let result = if output.is_dir() {
            fs::remove_dir_all(output)
        } else if output.exists() {
            fs::remove_file(output)
        } else {
            continue;
        };
        if result.is_ok() {
            removed.push(output.clone());
        }
    }
    removed
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread::sleep;
    use std::time::Duration;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(resolve_path(Path::new("../reads/x.fq"), Path::new("/data/run")), PathBuf::from("/data/reads/x.fq"));
        assert_eq!(resolve_path(Path::new("/abs/x.fq"), Path::new("/data")), PathBuf::from("/abs/x.fq"));
    }

    #[test]
    fn test_up_to_date() -> io::Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "a")?;
        assert!(!is_up_to_date(&[input.clone()], &[output.clone()]));

        sleep(Duration::from_millis(20));
        fs::write(&output, "b")?;
        assert!(is_up_to_date(&[input.clone()], &[output.clone()]));

        sleep(Duration::from_millis(20));
        fs::write(&input, "c")?;
        let touched = modified(&input).unwrap() > modified(&output).unwrap();
        assert_eq!(is_up_to_date(&[input], &[output]), !touched);
        Ok(())
    }

    #[test]
    fn test_concatenated_gzip_is_read_through() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("combined.fastq.gz");
        let mut bytes = Vec::new();
        for chunk in ["@r1\nACGT\n+\nIIII\n", "@r2\nTTTT\n+\nIIII\n"] {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(chunk.as_bytes())?;
            bytes.extend(enc.finish()?);
        }
        fs::write(&path, bytes)?;

        assert!(is_gzipped(&path)?);
        let lines = open_text_reader(&path)?.lines().count();
        assert_eq!(lines, 8);
        Ok(())
    }
}
