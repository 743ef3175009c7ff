//! Distance-matrix JSON with coordinate-tuple keys.
//!
//! JSON objects cannot be keyed by tuples, so matrices are written with the
//! textual key form `"(lon, lat)"` and parsed back into real coordinates
//! with a regex. Costs are plain integer seconds; the unreachable sentinel
//! passes through as its literal value.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::checkpoints::{Coordinate, Cost};

/// Travel-time matrix: source -> destination -> cost.
pub type Matrix = BTreeMap<Coordinate, BTreeMap<Coordinate, Cost>>;

#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    /// A key does not have the `"(lon, lat)"` shape.
    Key(String),
    /// A value is not an integer cost or a nested row object.
    Value(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "matrix JSON error: {}", e),
            CodecError::Key(key) => write!(f, "matrix key is not a coordinate pair: {:?}", key),
            CodecError::Value(key) => write!(f, "matrix value under {:?} has the wrong shape", key),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e)
    }
}

/// Writes a matrix as JSON with tuple-string keys.
pub fn dump<W: Write>(matrix: &Matrix, writer: W) -> Result<(), CodecError> {
    let mut root = Map::new();
    for (src, row) in matrix {
        let mut inner = Map::new();
        for (dst, cost) in row {
            inner.insert(dst.to_string(), Value::from(cost.seconds()));
        }
        root.insert(src.to_string(), Value::Object(inner));
    }
    serde_json::to_writer(writer, &Value::Object(root))?;
    Ok(())
}

/// Reads a matrix written by [`dump`].
pub fn load<R: Read>(reader: R) -> Result<Matrix, CodecError> {
    let root: Map<String, Value> = serde_json::from_reader(reader)?;
    let mut matrix = Matrix::new();
    for (key, value) in root {
        let src = parse_key(&key)?;
        let row = match value {
            Value::Object(row) => row,
            _ => return Err(CodecError::Value(key)),
        };
        let mut parsed_row = BTreeMap::new();
        for (inner_key, cost) in row {
            let dst = parse_key(&inner_key)?;
            let seconds = cost
                .as_u64()
                .ok_or_else(|| CodecError::Value(inner_key.clone()))?;
            parsed_row.insert(dst, Cost::from_seconds(seconds as u32));
        }
        matrix.insert(src, parsed_row);
    }
    Ok(matrix)
}

fn parse_key(key: &str) -> Result<Coordinate, CodecError> {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_RE.get_or_init(|| Regex::new(r"\(([\d.]+), ?([\d.]+)\)").unwrap());
    let caps = re.captures(key).ok_or_else(|| CodecError::Key(key.to_owned()))?;
    let lon = caps[1]
        .parse::<f64>()
        .map_err(|_| CodecError::Key(key.to_owned()))?;
    let lat = caps[2]
        .parse::<f64>()
        .map_err(|_| CodecError::Key(key.to_owned()))?;
    Ok(Coordinate::new(lon, lat))
}
