//! Pending write operations.
//!
//! A [`WriteOp`] is a closed set of mutation kinds with typed payloads. Every
//! backend dispatches on it exhaustively in its `exec`, so adding a kind is a
//! compile error everywhere it is not handled.

use std::ops::Range;

use crate::error::StoreError;

/// One buffered key-value mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set a scalar string value.
    Set { key: String, value: String },
    /// Set a single field of a map.
    SetField {
        key: String,
        field: String,
        value: String,
    },
    /// Set several fields of a map at once.
    SetFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Delete a key of any type.
    Del { key: String },
    /// Append values to the tail of a list.
    RPush { key: String, values: Vec<String> },
    /// Remove fields from a map.
    HDel { key: String, fields: Vec<String> },
    /// Keep only the `start..=stop` slice of a list (negative indices count from the end).
    LTrim { key: String, start: i64, stop: i64 },
    /// Add `delta` to an integer scalar (missing keys count as 0).
    IncrBy { key: String, delta: i64 },
    /// An untyped command, resolved to one of the variants above on flush.
    Raw { command: String, args: Vec<String> },
}

impl WriteOp {
    pub fn raw<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Raw {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The key this operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::SetField { key, .. }
            | Self::SetFields { key, .. }
            | Self::Del { key }
            | Self::RPush { key, .. }
            | Self::HDel { key, .. }
            | Self::LTrim { key, .. }
            | Self::IncrBy { key, .. } => key,
            Self::Raw { args, .. } => args.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Short command name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::SetField { .. } | Self::SetFields { .. } => "HSET",
            Self::Del { .. } => "DEL",
            Self::RPush { .. } => "RPUSH",
            Self::HDel { .. } => "HDEL",
            Self::LTrim { .. } => "LTRIM",
            Self::IncrBy { .. } => "INCRBY",
            Self::Raw { .. } => "RAW",
        }
    }

    /// Check the operation's shape and turn `Raw` into a typed variant.
    ///
    /// Type conflicts with data already stored are only detectable by the
    /// backend and are reported from `Backend::exec`.
    pub fn resolve(self) -> Result<Self, StoreError> {
        let op = match self {
            Self::Raw { command, args } => parse_raw(&command, args)?,
            op => op,
        };
        op.check_shape()?;
        Ok(op)
    }

    fn check_shape(&self) -> Result<(), StoreError> {
        let key = self.key();
        if key.is_empty() {
            return Err(StoreError::validation(key, format!("{} with empty key", self.name())));
        }
        match self {
            Self::SetFields { fields, .. } if fields.is_empty() => {
                Err(StoreError::validation(key, "HSET with no fields"))
            }
            Self::RPush { values, .. } if values.is_empty() => {
                Err(StoreError::validation(key, "RPUSH with no values"))
            }
            Self::HDel { fields, .. } if fields.is_empty() => {
                Err(StoreError::validation(key, "HDEL with no fields"))
            }
            _ => Ok(()),
        }
    }
}

fn parse_raw(command: &str, mut args: Vec<String>) -> Result<WriteOp, StoreError> {
    let key_hint = args.first().cloned().unwrap_or_default();
    let arity = |ok: bool| -> Result<(), StoreError> {
        if ok {
            Ok(())
        } else {
            Err(StoreError::validation(
                &key_hint,
                format!("wrong number of arguments for '{command}'"),
            ))
        }
    };
    let int = |s: &str| -> Result<i64, StoreError> {
        s.parse::<i64>()
            .map_err(|_| StoreError::validation(&key_hint, format!("'{s}' is not an integer")))
    };

    match command.to_ascii_uppercase().as_str() {
        "SET" => {
            arity(args.len() == 2)?;
            let value = args.pop().unwrap_or_default();
            let key = args.pop().unwrap_or_default();
            Ok(WriteOp::Set { key, value })
        }
        "HSET" => {
            arity(args.len() >= 3 && args.len() % 2 == 1)?;
            let mut it = args.into_iter();
            let key = it.next().unwrap_or_default();
            let mut fields = Vec::new();
            while let (Some(f), Some(v)) = (it.next(), it.next()) {
                fields.push((f, v));
            }
            if fields.len() == 1 {
                let (field, value) = fields.remove(0);
                Ok(WriteOp::SetField { key, field, value })
            } else {
                Ok(WriteOp::SetFields { key, fields })
            }
        }
        "DEL" => {
            arity(args.len() == 1)?;
            Ok(WriteOp::Del {
                key: args.remove(0),
            })
        }
        "RPUSH" => {
            arity(args.len() >= 2)?;
            let key = args.remove(0);
            Ok(WriteOp::RPush { key, values: args })
        }
        "HDEL" => {
            arity(args.len() >= 2)?;
            let key = args.remove(0);
            Ok(WriteOp::HDel { key, fields: args })
        }
        "LTRIM" => {
            arity(args.len() == 3)?;
            let start = int(&args[1])?;
            let stop = int(&args[2])?;
            Ok(WriteOp::LTrim {
                key: args.remove(0),
                start,
                stop,
            })
        }
        "INCRBY" => {
            arity(args.len() == 2)?;
            let delta = int(&args[1])?;
            Ok(WriteOp::IncrBy {
                key: args.remove(0),
                delta,
            })
        }
        "INCR" => {
            arity(args.len() == 1)?;
            Ok(WriteOp::IncrBy {
                key: args.remove(0),
                delta: 1,
            })
        }
        other => Err(StoreError::validation(
            key_hint.as_str(),
            format!("unsupported command '{other}'"),
        )),
    }
}

/// Convert inclusive, possibly negative list indices into a slice range.
///
/// Follows list-range semantics: `-1` is the last element, out-of-range
/// bounds are clamped, and an inverted range is empty.
pub fn list_range(len: usize, start: i64, stop: i64) -> Range<usize> {
    let len_i = len as i64;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let stop = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    if len == 0 || start > stop || start >= len_i {
        return 0..0;
    }
    start as usize..(stop + 1) as usize
}
