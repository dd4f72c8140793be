use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bucket count must be at least 1")]
    InvalidBucketCount,

    #[error("bucket {bucket} out of range for {bucket_count} buckets")]
    BucketOutOfRange { bucket: u32, bucket_count: u32 },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: malformed record {record:?}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        record: String,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
