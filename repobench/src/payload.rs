use std::io;
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

/// Creates a temporary file of exactly `size` bytes. The content is
/// irrelevant to the benchmark, so the file is left sparse.
///
/// The file is removed when the returned handle is dropped.
pub fn generate(dir: Option<&Path>, size: u64) -> io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix("repobench-").suffix(".payload");
    let file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.as_file().set_len(size)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_has_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        for size in [0u64, 1, 1024, 4096, 1 << 20, (1 << 20) + 7] {
            let payload = generate(Some(dir.path()), size).unwrap();
            assert_eq!(payload.as_file().metadata().unwrap().len(), size);
            assert!(payload.path().starts_with(dir.path()));
        }
    }

    #[test]
    fn test_payload_removed_on_drop() {
        let payload = generate(None, 2048).unwrap();
        let path = payload.path().to_path_buf();
        assert!(path.exists());
        drop(payload);
        assert!(!path.exists());
    }
}
