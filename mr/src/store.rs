//! Intermediate bucket files.
//!
//! One record per line, `<key> <value>\n`, single space separated and
//! unescaped: keys must not contain spaces and neither part may contain a
//! newline.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::app::KeyValue;
use crate::error::{Error, Result};
use crate::partition::bucket_for;
use crate::task::MapOutput;

const BUCKET_FILE_PREFIX: &str = "intermediate-";

pub fn bucket_file_name(bucket: u32) -> String {
    format!("{}{}", BUCKET_FILE_PREFIX, bucket)
}

pub fn write_record<W: Write>(out: &mut W, key: &str, value: &str) -> std::io::Result<()> {
    writeln!(out, "{} {}", key, value)
}

/// Append-only bucket files of one Map task, each behind its own lock so
/// several writers can share the set.
#[derive(Debug)]
pub struct BucketFiles {
    dir: PathBuf,
    files: Vec<Mutex<BufWriter<File>>>,
}

impl BucketFiles {
    /// Creates `dir` and one empty file per bucket inside it.
    pub fn create(dir: &Path, bucket_count: u32) -> Result<Self> {
        if bucket_count == 0 {
            return Err(Error::InvalidBucketCount);
        }
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut files = Vec::with_capacity(bucket_count as usize);
        for bucket in 0..bucket_count {
            let path = dir.join(bucket_file_name(bucket));
            let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
            files.push(Mutex::new(BufWriter::new(file)));
        }

        Ok(BucketFiles {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_count(&self) -> u32 {
        self.files.len() as u32
    }

    pub fn append(&self, bucket: u32, kv: &KeyValue) -> Result<()> {
        let file = self.files.get(bucket as usize).ok_or(Error::BucketOutOfRange {
            bucket,
            bucket_count: self.bucket_count(),
        })?;
        let mut writer = file.lock().unwrap_or_else(PoisonError::into_inner);
        write_record(&mut *writer, &kv.key, &kv.value)
            .map_err(|e| Error::io(self.dir.join(bucket_file_name(bucket)), e))
    }

    /// Routes `kv` to the bucket its key hashes to.
    pub fn append_partitioned(&self, kv: &KeyValue) -> Result<()> {
        self.append(bucket_for(&kv.key, self.bucket_count()), kv)
    }

    pub fn flush(&self) -> Result<()> {
        for (bucket, file) in self.files.iter().enumerate() {
            let mut writer = file.lock().unwrap_or_else(PoisonError::into_inner);
            writer
                .flush()
                .map_err(|e| Error::io(self.dir.join(bucket_file_name(bucket as u32)), e))?;
        }
        Ok(())
    }
}

fn parse_record(path: &Path, line_no: usize, line: &str) -> Result<KeyValue> {
    match line.split_once(' ') {
        Some((key, value)) if !key.is_empty() => Ok(KeyValue::new(key, value)),
        _ => Err(Error::MalformedRecord {
            path: path.to_path_buf(),
            line: line_no + 1,
            record: line.to_string(),
        }),
    }
}

fn read_records(path: &Path, out: &mut Vec<KeyValue>) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        out.push(parse_record(path, line_no, &line)?);
    }
    Ok(())
}

/// Stable sort by key, so values of one key keep their append order.
pub fn sort_by_key(records: &mut [KeyValue]) {
    records.sort_by(|a, b| a.key.cmp(&b.key));
}

/// Reads one bucket file back, sorted by key.
pub fn load_bucket(path: &Path) -> Result<Vec<KeyValue>> {
    let mut records = Vec::new();
    read_records(path, &mut records)?;
    sort_by_key(&mut records);
    Ok(records)
}

/// Collects bucket `index` of every listed Map output and returns the merged
/// records sorted by key.
///
/// Worker directories are visited in the given order and their entries in
/// name order. Only directories named after an entry of `outputs` are read,
/// each at most once, so output of a superseded attempt or unfinished
/// staging output never reaches Reduce.
pub fn load_partition(
    worker_dirs: &[PathBuf],
    outputs: &[MapOutput],
    index: u32,
) -> Result<Vec<KeyValue>> {
    let mut wanted: HashMap<String, MapOutput> =
        outputs.iter().map(|o| (o.dir_name(), *o)).collect();
    let mut merged = Vec::new();
    for worker_dir in worker_dirs {
        if !worker_dir.is_dir() {
            warn!("worker directory {} not found, skipping", worker_dir.display());
            continue;
        }

        let mut task_dirs = Vec::new();
        for entry in fs::read_dir(worker_dir).map_err(|e| Error::io(worker_dir, e))? {
            let entry = entry.map_err(|e| Error::io(worker_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if wanted.contains_key(&name) && entry.path().is_dir() {
                task_dirs.push((name, entry.path()));
            }
        }
        task_dirs.sort();

        for (name, task_dir) in task_dirs {
            wanted.remove(&name);
            let path = task_dir.join(bucket_file_name(index));
            if !path.is_file() {
                debug!("no bucket file {}", path.display());
                continue;
            }
            debug!("loading data from {}", path.display());
            read_records(&path, &mut merged)?;
        }
    }
    for missing in wanted.values() {
        warn!(
            "output of map task {} (generation {}) not found in any worker directory",
            missing.task_id, missing.generation
        );
    }
    sort_by_key(&mut merged);
    Ok(merged)
}

/// Groups consecutive equal keys of an already sorted sequence.
pub fn group_sorted(records: Vec<KeyValue>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for kv in records {
        match groups.last_mut() {
            Some((key, values)) if *key == kv.key => values.push(kv.value),
            _ => groups.push((kv.key, vec![kv.value])),
        }
    }
    groups
}
