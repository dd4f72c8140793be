//! Running a whole job inside the calling process.
//!
//! Both runtimes write every key to one sorted output file. They share the
//! record format and the Map/Reduce contract with the distributed job, so the
//! three produce the same key/value pairs for the same input.

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context as _};
use tracing::{debug, info};

use crate::app::{KeyValue, MapReduceApp};
use crate::config::{LocalConfig, RuntimeMode};
use crate::store::{self, BucketFiles};
use crate::worker::{reduce_sorted, write_output};

pub trait Runtime {
    fn run(&self, app: MapReduceApp, input_files: &[PathBuf]) -> anyhow::Result<()>;
}

pub fn from_config(config: &LocalConfig) -> Box<dyn Runtime> {
    match config.mode {
        RuntimeMode::Sequential => Box::new(SequentialRuntime::new(&config.output)),
        RuntimeMode::Multithreaded => Box::new(MultithreadedRuntime::new(
            &config.work_dir,
            &config.output,
            config.buckets,
        )),
    }
}

/// Maps every file in turn and keeps all intermediate records in memory.
#[derive(Debug, Clone)]
pub struct SequentialRuntime {
    output: PathBuf,
}

impl SequentialRuntime {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        SequentialRuntime {
            output: output.into(),
        }
    }
}

impl Runtime for SequentialRuntime {
    fn run(&self, app: MapReduceApp, input_files: &[PathBuf]) -> anyhow::Result<()> {
        let mut intermediate = Vec::new();
        for file in input_files {
            intermediate.extend(map_file(app, file)?);
        }
        store::sort_by_key(&mut intermediate);
        let keys = reduce_into(app, intermediate, &self.output)?;
        info!("sequential run wrote {} keys to {}", keys, self.output.display());
        Ok(())
    }
}

/// One Map thread per input file, all appending to one shared set of bucket
/// files; then a single Reduce pass over every bucket.
#[derive(Debug, Clone)]
pub struct MultithreadedRuntime {
    work_dir: PathBuf,
    output: PathBuf,
    buckets: u32,
}

impl MultithreadedRuntime {
    pub fn new(work_dir: impl Into<PathBuf>, output: impl Into<PathBuf>, buckets: u32) -> Self {
        MultithreadedRuntime {
            work_dir: work_dir.into(),
            output: output.into(),
            buckets,
        }
    }
}

impl Runtime for MultithreadedRuntime {
    fn run(&self, app: MapReduceApp, input_files: &[PathBuf]) -> anyhow::Result<()> {
        let files = BucketFiles::create(&self.work_dir, self.buckets)?;

        thread::scope(|s| -> anyhow::Result<()> {
            let handles: Vec<_> = input_files
                .iter()
                .map(|input| {
                    let files = &files;
                    s.spawn(move || -> anyhow::Result<()> {
                        let pairs = map_file(app, input)?;
                        for kv in &pairs {
                            files.append_partitioned(kv)?;
                        }
                        debug!("mapped {} records from {}", pairs.len(), input.display());
                        Ok(())
                    })
                })
                .collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| anyhow!("map thread panicked"))??;
            }
            Ok(())
        })?;
        files.flush()?;

        let mut intermediate = Vec::new();
        for bucket in 0..files.bucket_count() {
            let path = files.dir().join(store::bucket_file_name(bucket));
            intermediate.extend(store::load_bucket(&path)?);
        }
        store::sort_by_key(&mut intermediate);
        let keys = reduce_into(app, intermediate, &self.output)?;
        info!(
            "multithreaded run over {} file(s) wrote {} keys to {}",
            input_files.len(),
            keys,
            self.output.display()
        );
        Ok(())
    }
}

fn map_file(app: MapReduceApp, input: &Path) -> anyhow::Result<Vec<KeyValue>> {
    let content =
        fs::read_to_string(input).with_context(|| format!("cannot read {}", input.display()))?;
    let filename = input.to_string_lossy().into_owned();
    catch_unwind(AssertUnwindSafe(|| (app.map_fn)(filename, content)))
        .map_err(|_| anyhow!("map function panicked on {}", input.display()))
}

fn reduce_into(app: MapReduceApp, sorted: Vec<KeyValue>, output: &Path) -> anyhow::Result<usize> {
    let reduced = reduce_sorted(app, sorted).ok_or_else(|| anyhow!("reduce function panicked"))?;
    write_output(output, &reduced)?;
    Ok(reduced.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_words(_filename: String, contents: String) -> Vec<KeyValue> {
        contents
            .split_whitespace()
            .map(|word| KeyValue::new(word, "1"))
            .collect()
    }

    fn count(_key: String, values: Vec<String>) -> String {
        values.len().to_string()
    }

    fn panicking_map(_filename: String, _contents: String) -> Vec<KeyValue> {
        panic!("bad input")
    }

    fn inputs(dir: &Path) -> Vec<PathBuf> {
        ["b a", "a c a", ""]
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let path = dir.join(format!("in-{}.txt", i));
                fs::write(&path, text).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_sequential_runtime() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("mr-out-0");

        SequentialRuntime::new(&output)
            .run(MapReduceApp::new(count_words, count), &inputs(tmp.path()))
            .unwrap();
        assert_eq!(fs::read_to_string(output).unwrap(), "a 3\nb 1\nc 1\n");
    }

    #[test]
    fn test_multithreaded_runtime_matches_sequential() {
        let tmp = tempfile::tempdir().unwrap();
        let files = inputs(tmp.path());
        let app = MapReduceApp::new(count_words, count);

        let sequential = tmp.path().join("seq-out");
        SequentialRuntime::new(&sequential).run(app, &files).unwrap();
        let threaded = tmp.path().join("mt-out");
        MultithreadedRuntime::new(tmp.path().join("intermediate"), &threaded, 3)
            .run(app, &files)
            .unwrap();

        assert_eq!(
            fs::read_to_string(threaded).unwrap(),
            fs::read_to_string(sequential).unwrap()
        );
        assert!(tmp.path().join("intermediate").join("intermediate-2").is_file());
    }

    #[test]
    fn test_runtime_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = vec![tmp.path().join("nope.txt")];
        let app = MapReduceApp::new(count_words, count);
        let err = SequentialRuntime::new(tmp.path().join("out"))
            .run(app, &missing)
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));

        let broken = MapReduceApp::new(panicking_map, count);
        let runtime = MultithreadedRuntime::new(tmp.path().join("work"), tmp.path().join("out"), 2);
        assert!(runtime.run(broken, &inputs(tmp.path())).is_err());
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn test_from_config_picks_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let config = LocalConfig {
            mode: RuntimeMode::Sequential,
            output: tmp.path().join("out"),
            work_dir: tmp.path().join("never-created"),
            ..LocalConfig::default()
        };
        from_config(&config)
            .run(MapReduceApp::new(count_words, count), &inputs(tmp.path()))
            .unwrap();
        assert!(tmp.path().join("out").is_file());
        assert!(!tmp.path().join("never-created").exists());
    }
}
