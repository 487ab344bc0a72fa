// rust/dispatcher-core/src/snapshot/paths.rs

//! On-disk layout of a distributed snapshot.
//!
//! ```text
//! <snapshot>/
//!   snapshot.metadata
//!   dataset_def.proto
//!   committed_chunks/
//!   streams/
//!     stream_<i>/
//!       DONE
//!       checkpoints/
//!       uncommitted_chunks/
//!       splits/
//!         source_<s>/
//!           split_<local>_<global>
//! ```

use std::path::{Path, PathBuf};

const DONE_FILE_NAME: &str = "DONE";
const SNAPSHOT_METADATA_FILE_NAME: &str = "snapshot.metadata";
const DATASET_DEF_FILE_NAME: &str = "dataset_def.proto";
const STREAMS_DIRECTORY_NAME: &str = "streams";
const SPLITS_DIRECTORY_NAME: &str = "splits";
const CHECKPOINTS_DIRECTORY_NAME: &str = "checkpoints";
const COMMITTED_CHUNKS_DIRECTORY_NAME: &str = "committed_chunks";
const UNCOMMITTED_CHUNKS_DIRECTORY_NAME: &str = "uncommitted_chunks";

const STREAM_PREFIX: &str = "stream_";
const SOURCE_PREFIX: &str = "source_";
const SPLIT_PREFIX: &str = "split_";

pub fn streams_directory(snapshot: &Path) -> PathBuf {
    snapshot.join(STREAMS_DIRECTORY_NAME)
}

pub fn stream_directory(snapshot: &Path, stream_index: usize) -> PathBuf {
    streams_directory(snapshot).join(format!("{STREAM_PREFIX}{stream_index}"))
}

pub fn splits_directory(snapshot: &Path, stream_index: usize) -> PathBuf {
    stream_directory(snapshot, stream_index).join(SPLITS_DIRECTORY_NAME)
}

pub fn source_directory(snapshot: &Path, stream_index: usize, source_index: usize) -> PathBuf {
    splits_directory(snapshot, stream_index).join(format!("{SOURCE_PREFIX}{source_index}"))
}

pub fn split_path(
    snapshot: &Path,
    stream_index: usize,
    source_index: usize,
    local_index: u64,
    global_index: u64,
) -> PathBuf {
    source_directory(snapshot, stream_index, source_index)
        .join(format!("{SPLIT_PREFIX}{local_index}_{global_index}"))
}

pub fn snapshot_metadata_path(snapshot: &Path) -> PathBuf {
    snapshot.join(SNAPSHOT_METADATA_FILE_NAME)
}

pub fn dataset_def_path(snapshot: &Path) -> PathBuf {
    snapshot.join(DATASET_DEF_FILE_NAME)
}

pub fn stream_done_path(snapshot: &Path, stream_index: usize) -> PathBuf {
    stream_directory(snapshot, stream_index).join(DONE_FILE_NAME)
}

pub fn checkpoints_directory(snapshot: &Path, stream_index: usize) -> PathBuf {
    stream_directory(snapshot, stream_index).join(CHECKPOINTS_DIRECTORY_NAME)
}

pub fn committed_chunks_directory(snapshot: &Path) -> PathBuf {
    snapshot.join(COMMITTED_CHUNKS_DIRECTORY_NAME)
}

pub fn uncommitted_chunks_directory(snapshot: &Path, stream_index: usize) -> PathBuf {
    stream_directory(snapshot, stream_index).join(UNCOMMITTED_CHUNKS_DIRECTORY_NAME)
}

/// Parses a `stream_<i>` directory name.
pub fn parse_stream_directory_name(name: &str) -> Option<usize> {
    name.strip_prefix(STREAM_PREFIX)?.parse().ok()
}

/// Parses a `split_<local>_<global>` file name into `(local, global)`.
pub fn parse_split_file_name(name: &str) -> Option<(u64, u64)> {
    let (local, global) = name.strip_prefix(SPLIT_PREFIX)?.split_once('_')?;
    Some((local.parse().ok()?, global.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_layout() {
        let root = Path::new("/snap");

        assert_eq!(streams_directory(root), PathBuf::from("/snap/streams"));
        assert_eq!(stream_directory(root, 3), PathBuf::from("/snap/streams/stream_3"));
        assert_eq!(
            splits_directory(root, 3),
            PathBuf::from("/snap/streams/stream_3/splits")
        );
        assert_eq!(
            source_directory(root, 3, 1),
            PathBuf::from("/snap/streams/stream_3/splits/source_1")
        );
        assert_eq!(
            split_path(root, 3, 1, 7, 42),
            PathBuf::from("/snap/streams/stream_3/splits/source_1/split_7_42")
        );
        assert_eq!(snapshot_metadata_path(root), PathBuf::from("/snap/snapshot.metadata"));
        assert_eq!(dataset_def_path(root), PathBuf::from("/snap/dataset_def.proto"));
        assert_eq!(stream_done_path(root, 0), PathBuf::from("/snap/streams/stream_0/DONE"));
        assert_eq!(
            checkpoints_directory(root, 0),
            PathBuf::from("/snap/streams/stream_0/checkpoints")
        );
        assert_eq!(committed_chunks_directory(root), PathBuf::from("/snap/committed_chunks"));
        assert_eq!(
            uncommitted_chunks_directory(root, 0),
            PathBuf::from("/snap/streams/stream_0/uncommitted_chunks")
        );
    }

    #[test]
    fn test_split_paths_do_not_collide() {
        let root = Path::new("relative/snapshot");
        let mut seen = HashSet::new();

        for stream in 0..12 {
            for source in 0..12 {
                for local in 0..12 {
                    // Global index is irrelevant to uniqueness; vary it anyway.
                    let global = (stream * 100 + source * 10) as u64 + local;
                    assert!(seen.insert(split_path(root, stream, source, local, global)));
                }
            }
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(parse_stream_directory_name("stream_12"), Some(12));
        assert_eq!(parse_stream_directory_name("stream_"), None);
        assert_eq!(parse_stream_directory_name("source_1"), None);

        assert_eq!(parse_split_file_name("split_3_17"), Some((3, 17)));
        assert_eq!(parse_split_file_name("split_3"), None);
        assert_eq!(parse_split_file_name(".split_3_17.tmp-1-0"), None);
        assert_eq!(parse_split_file_name("split_x_1"), None);
    }

    #[test]
    fn test_parse_inverts_formatting() {
        let path = split_path(Path::new("/s"), 2, 0, 5, 9);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_split_file_name(name), Some((5, 9)));

        let dir = stream_directory(Path::new("/s"), 4);
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_stream_directory_name(name), Some(4));
    }
}
