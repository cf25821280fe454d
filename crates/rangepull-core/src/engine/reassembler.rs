//! Reassembler - folds chunk files back into the final file, in order

use crate::error::RangepullError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

const MERGE_BUFFER_SIZE: usize = 1024 * 1024;

/// Path of the chunk file with 1-based `part_number` for `destination`
pub fn chunk_path(destination: &Path, part_number: u32) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(format!(".part{:03}", part_number));
    PathBuf::from(name)
}

/// Concatenate `<destination>.part001..=partNNN` into `destination`.
///
/// Any existing file at `destination` is replaced. Each chunk is deleted
/// once copied. On failure the remaining chunks stay on disk.
/// Returns the number of bytes written.
pub async fn combine(destination: &Path, chunk_count: usize) -> Result<u64, RangepullError> {
    info!("Merging {} chunks into {:?}", chunk_count, destination);

    match tokio::fs::remove_file(destination).await {
        Ok(()) => debug!("Replaced existing file {:?}", destination),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .await
        .inspect_err(|e| error!("Failed to create final file {:?}: {}", destination, e))?;

    let mut buffer = vec![0u8; MERGE_BUFFER_SIZE];
    let mut total: u64 = 0;

    for part_number in 1..=chunk_count as u32 {
        let part = chunk_path(destination, part_number);

        let mut input = File::open(&part)
            .await
            .inspect_err(|e| error!("Failed to open chunk {:?}: {}", part, e))?;

        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buffer[..n]).await?;
            total += n as u64;
        }
        drop(input);

        if let Err(e) = tokio::fs::remove_file(&part).await {
            warn!("Failed to remove chunk {:?}: {}", part, e);
        }
    }

    output.flush().await?;
    output.sync_all().await?;

    info!("Merge complete: {:?} ({} bytes)", destination, total);
    Ok(total)
}

/// Best-effort removal of every chunk file of a job
pub async fn remove_chunks(destination: &Path, chunk_count: usize) {
    for part_number in 1..=chunk_count as u32 {
        let part = chunk_path(destination, part_number);
        match tokio::fs::remove_file(&part).await {
            Ok(()) => debug!("Removed leftover chunk {:?}", part),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove chunk {:?}: {}", part, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_names_are_zero_padded() {
        let dest = Path::new("out/file.bin");
        assert_eq!(chunk_path(dest, 1), PathBuf::from("out/file.bin.part001"));
        assert_eq!(chunk_path(dest, 42), PathBuf::from("out/file.bin.part042"));
        assert_eq!(chunk_path(dest, 1234), PathBuf::from("out/file.bin.part1234"));
    }

    #[tokio::test]
    async fn combines_in_index_order_and_removes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("joined.bin");
        tokio::fs::write(chunk_path(&dest, 1), b"hello ").await.unwrap();
        tokio::fs::write(chunk_path(&dest, 2), b"chunked ").await.unwrap();
        tokio::fs::write(chunk_path(&dest, 3), b"world").await.unwrap();
        tokio::fs::write(&dest, b"stale contents that must go").await.unwrap();

        let written = combine(&dest, 3).await.unwrap();

        assert_eq!(written, 19);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello chunked world");
        for part in 1..=3 {
            assert!(!chunk_path(&dest, part).exists());
        }
    }

    #[tokio::test]
    async fn zero_chunks_leave_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("empty.bin");

        assert_eq!(combine(&dest, 0).await.unwrap(), 0);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_chunk_aborts_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("broken.bin");
        tokio::fs::write(chunk_path(&dest, 1), b"a").await.unwrap();
        tokio::fs::write(chunk_path(&dest, 3), b"c").await.unwrap();

        let err = combine(&dest, 3).await.unwrap_err();

        assert!(matches!(err, RangepullError::Io(_)));
        assert!(!chunk_path(&dest, 1).exists());
        assert!(chunk_path(&dest, 3).exists());
    }

    #[tokio::test]
    async fn remove_chunks_tolerates_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.bin");
        tokio::fs::write(chunk_path(&dest, 2), b"b").await.unwrap();

        remove_chunks(&dest, 3).await;

        assert!(!chunk_path(&dest, 2).exists());
    }
}
