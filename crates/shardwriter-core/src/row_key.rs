//! Partition key derivation.
//!
//! A table's partition key is either one column, whose raw bytes are the row
//! key, or several columns combined with the composite encoding:
//!
//! ```text
//! | len: u16 BE | component bytes | 0x00 | len: u16 BE | ... | 0x00 |
//! ```
//!
//! Components are written in the table's declared key order, so swapping two
//! columns changes the encoding.

use crate::transport::KeyLayoutDescriptor;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// End-of-component marker written after each composite component.
const END_OF_COMPONENT: u8 = 0;

const COMPOSITE_TYPE: &str = "CompositeType";

/// Byte-encoded partition key of a record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RowKey(Bytes);

impl RowKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for RowKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey(0x")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Parsed key validator descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidator {
    /// One key column of the given type
    Single(String),
    /// Composite key with one type per component
    Composite(Vec<String>),
}

impl KeyValidator {
    /// Parse a type descriptor such as
    /// `org.apache.cassandra.db.marshal.CompositeType(UTF8Type,Int32Type)`.
    ///
    /// Package prefixes are stripped. Counter columns are keyed like longs.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (name, params) = split_type(descriptor)?;

        if short_name(name) == COMPOSITE_TYPE {
            let params = params.ok_or_else(|| {
                Error::Config(format!("Composite key validator without components: {descriptor}"))
            })?;
            let components = split_params(params, descriptor)?
                .into_iter()
                .map(canonical_type)
                .collect::<Result<Vec<_>>>()?;
            Ok(KeyValidator::Composite(components))
        } else {
            Ok(KeyValidator::Single(canonical_type(descriptor)?))
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, KeyValidator::Composite(_))
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Split `Name(params)` into name and optional parameter list.
fn split_type(descriptor: &str) -> Result<(&str, Option<&str>)> {
    let descriptor = descriptor.trim();
    let (name, params) = match descriptor.find('(') {
        Some(open) => {
            let params = descriptor[open + 1..]
                .strip_suffix(')')
                .ok_or_else(|| Error::Config(format!("Malformed type descriptor: {descriptor}")))?;
            (descriptor[..open].trim(), Some(params))
        }
        None => (descriptor, None),
    };

    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '$'));
    if !valid_name {
        return Err(Error::Config(format!(
            "Unrecognized type descriptor: {descriptor:?}"
        )));
    }

    Ok((name, params))
}

/// Split a parameter list on top-level commas.
fn split_params<'a>(params: &'a str, descriptor: &str) -> Result<Vec<&'a str>> {
    let malformed = || Error::Config(format!("Malformed type descriptor: {descriptor}"));

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or_else(malformed)?,
            ',' if depth == 0 => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed());
    }
    parts.push(params[start..].trim());

    if parts.iter().any(|p| p.is_empty()) {
        return Err(malformed());
    }
    Ok(parts)
}

fn canonical_type(descriptor: &str) -> Result<String> {
    let (name, params) = split_type(descriptor)?;
    let short = match short_name(name) {
        "CounterColumnType" => "LongType",
        other => other,
    };

    match params {
        Some(params) => {
            let inner = split_params(params, descriptor)?
                .into_iter()
                .map(canonical_type)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{}({})", short, inner.join(",")))
        }
        None => Ok(short.to_string()),
    }
}

/// Partition key columns and how they combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    validator: KeyValidator,
    columns: Vec<String>,
}

impl KeyLayout {
    /// Build a layout, checking the validator against the column list.
    pub fn new(validator: KeyValidator, columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Config("Partition key has no columns".into()));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() {
                return Err(Error::Config("Empty partition key column name".into()));
            }
            if !seen.insert(column.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate partition key column: {column}"
                )));
            }
        }

        match &validator {
            KeyValidator::Composite(components) if components.len() != columns.len() => {
                return Err(Error::Config(format!(
                    "Composite key has {} components but {} key columns",
                    components.len(),
                    columns.len()
                )));
            }
            KeyValidator::Single(_) if columns.len() != 1 => {
                return Err(Error::Config(format!(
                    "Non-composite key validator with {} key columns",
                    columns.len()
                )));
            }
            _ => {}
        }

        Ok(Self { validator, columns })
    }

    /// Parse a validator descriptor and attach the column list.
    pub fn parse(validator: &str, columns: Vec<String>) -> Result<Self> {
        Self::new(KeyValidator::parse(validator)?, columns)
    }

    /// Build from the raw metadata answer (`key_aliases` is a JSON list).
    pub fn from_descriptor(descriptor: &KeyLayoutDescriptor) -> Result<Self> {
        let columns: Vec<String> = serde_json::from_str(&descriptor.key_aliases).map_err(|e| {
            Error::Config(format!(
                "Invalid key aliases {:?}: {}",
                descriptor.key_aliases, e
            ))
        })?;
        Self::parse(&descriptor.key_validator, columns)
    }

    pub fn validator(&self) -> &KeyValidator {
        &self.validator
    }

    /// Key columns in declared order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_composite(&self) -> bool {
        self.validator.is_composite()
    }
}

/// Derives row keys from named column values.
#[derive(Debug, Clone)]
pub struct RowKeyBuilder {
    layout: KeyLayout,
}

impl RowKeyBuilder {
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Build the row key for one record's key columns.
    pub fn build(&self, keys: &HashMap<String, Bytes>) -> Result<RowKey> {
        if !self.layout.is_composite() {
            let column = &self.layout.columns[0];
            return keys
                .get(column)
                .cloned()
                .map(RowKey)
                .ok_or_else(|| Error::MissingKeyColumn(column.clone()));
        }

        let mut components = Vec::with_capacity(self.layout.columns.len());
        for column in &self.layout.columns {
            let value = keys
                .get(column)
                .ok_or_else(|| Error::MissingKeyColumn(column.clone()))?;
            if value.len() > u16::MAX as usize {
                return Err(Error::InvalidKey(format!(
                    "Component {} is {} bytes, limit is {}",
                    column,
                    value.len(),
                    u16::MAX
                )));
            }
            components.push(value);
        }

        let size = components.iter().map(|c| c.len() + 3).sum();
        let mut buf = BytesMut::with_capacity(size);
        for component in components {
            buf.put_u16(component.len() as u16);
            buf.put_slice(component);
            buf.put_u8(END_OF_COMPONENT);
        }
        Ok(RowKey(buf.freeze()))
    }
}
