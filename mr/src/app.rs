#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub type MapFn = fn(String, String) -> Vec<KeyValue>;
pub type ReduceFn = fn(String, Vec<String>) -> String;

/// The user-supplied Map/Reduce pair a worker executes.
#[derive(Clone, Copy)]
pub struct MapReduceApp {
    pub map_fn: MapFn,
    pub reduce_fn: ReduceFn,
}

impl MapReduceApp {
    pub fn new(map_fn: MapFn, reduce_fn: ReduceFn) -> Self {
        MapReduceApp { map_fn, reduce_fn }
    }
}

impl std::fmt::Debug for MapReduceApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapReduceApp").finish_non_exhaustive()
    }
}
