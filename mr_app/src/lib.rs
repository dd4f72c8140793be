//! The word count application shared by the binaries.

use mr::{KeyValue, MapReduceApp};

pub fn map_function(_filename: String, contents: String) -> Vec<KeyValue> {
    contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect()
}

pub fn reduce_function(_key: String, values: Vec<String>) -> String {
    values.len().to_string()
}

pub fn word_count() -> MapReduceApp {
    MapReduceApp::new(map_function, reduce_function)
}
