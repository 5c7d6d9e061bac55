//! Field Serializer
//!
//! Structured values (lists, maps) are stored in scalar columns through a
//! named codec per column. Encoding happens on write, decoding on read.

use crate::declaration::EntityDeclaration;
use crate::error::{CodecError, ConfigError, VernierResult};
use crate::{value_kind, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A reversible mapping between a structured value and its stored form.
pub trait FieldCodec: Send + Sync {
    /// Name used in entity declarations.
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> VernierResult<Value>;

    fn decode(&self, stored: &Value) -> VernierResult<Value>;
}

/// Any value to JSON text. Null stays null; an empty stored string reads as null.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FieldCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> VernierResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            other => serde_json::to_string(other)
                .map(Value::String)
                .map_err(|e| encode_error(self.name(), e.to_string())),
        }
    }

    fn decode(&self, stored: &Value) -> VernierResult<Value> {
        match stored {
            Value::Null => Ok(Value::Null),
            Value::String(s) if s.is_empty() => Ok(Value::Null),
            Value::String(s) => {
                serde_json::from_str(s).map_err(|e| decode_error(self.name(), e.to_string()))
            }
            // Some drivers hand JSON columns back already parsed.
            other => Ok(other.clone()),
        }
    }
}

/// List of text scalars to `|a|b|c|`. `[]` is stored as `""`.
///
/// Decoding always yields strings, so numbers are rejected on encode rather
/// than coming back as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterCodec;

const DELIMITER: char = '|';

impl FieldCodec for DelimiterCodec {
    fn name(&self) -> &str {
        "delimiter"
    }

    fn encode(&self, value: &Value) -> VernierResult<Value> {
        let items = match value {
            Value::Null => return Ok(Value::Null),
            Value::Array(items) => items,
            other => {
                return Err(encode_error(
                    self.name(),
                    format!("expected a list, got {}", value_kind(other)),
                ))
            }
        };
        if items.is_empty() {
            return Ok(Value::String(String::new()));
        }

        let mut encoded = String::from(DELIMITER);
        for item in items {
            let text = match item {
                Value::String(s) => s.clone(),
                other => {
                    return Err(encode_error(
                        self.name(),
                        format!("list elements must be text, got {}", value_kind(other)),
                    ))
                }
            };
            if text.is_empty() || text.contains(DELIMITER) {
                return Err(encode_error(
                    self.name(),
                    format!("element `{}` is empty or contains `{}`", text, DELIMITER),
                ));
            }
            encoded.push_str(&text);
            encoded.push(DELIMITER);
        }
        Ok(Value::String(encoded))
    }

    fn decode(&self, stored: &Value) -> VernierResult<Value> {
        let text = match stored {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => s,
            other => {
                return Err(decode_error(
                    self.name(),
                    format!("expected text, got {}", value_kind(other)),
                ))
            }
        };
        let trimmed = text.trim_matches(DELIMITER);
        if trimmed.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(Value::Array(
            trimmed
                .split(DELIMITER)
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ))
    }
}

/// Null-safe text passthrough.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl FieldCodec for TextCodec {
    fn name(&self) -> &str {
        "text"
    }

    fn encode(&self, value: &Value) -> VernierResult<Value> {
        match value {
            Value::Null | Value::String(_) => Ok(value.clone()),
            other => Err(encode_error(
                self.name(),
                format!("expected text, got {}", value_kind(other)),
            )),
        }
    }

    fn decode(&self, stored: &Value) -> VernierResult<Value> {
        Ok(stored.clone())
    }
}

fn encode_error(codec: &str, reason: String) -> crate::VernierError {
    CodecError::Encode {
        codec: codec.to_string(),
        reason,
    }
    .into()
}

fn decode_error(codec: &str, reason: String) -> crate::VernierError {
    CodecError::Decode {
        codec: codec.to_string(),
        reason,
    }
    .into()
}

/// Codec registry.
#[derive(Clone)]
pub struct FieldSerializer {
    codecs: HashMap<String, Arc<dyn FieldCodec>>,
}

impl Default for FieldSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FieldSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FieldSerializer")
            .field("codecs", &names)
            .finish()
    }
}

impl FieldSerializer {
    /// Registry with `json`, `delimiter` and `text`.
    pub fn new() -> Self {
        let mut serializer = Self {
            codecs: HashMap::new(),
        };
        serializer.register(JsonCodec);
        serializer.register(DelimiterCodec);
        serializer.register(TextCodec);
        serializer
    }

    /// Add or replace a codec under its own name.
    pub fn register<C: FieldCodec + 'static>(&mut self, codec: C) {
        self.codecs.insert(codec.name().to_string(), Arc::new(codec));
    }

    pub fn has_codec(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    fn codec(&self, name: &str) -> VernierResult<&Arc<dyn FieldCodec>> {
        self.codecs.get(name).ok_or_else(|| {
            CodecError::UnknownCodec {
                codec: name.to_string(),
            }
            .into()
        })
    }

    pub fn encode(&self, codec: &str, value: &Value) -> VernierResult<Value> {
        self.codec(codec)?.encode(value)
    }

    pub fn decode(&self, codec: &str, stored: &Value) -> VernierResult<Value> {
        self.codec(codec)?.decode(stored)
    }

    /// Every codec the declaration names must be registered.
    pub fn check_declaration(&self, declaration: &EntityDeclaration) -> VernierResult<()> {
        for (field, codec) in declaration.serialized_fields() {
            if !self.has_codec(codec) {
                return Err(ConfigError::UnknownCodec {
                    field: format!("{}.{}", declaration.table(), field),
                    codec: codec.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Encode the declared serialized columns present in `row`, in place.
    pub fn encode_row(&self, declaration: &EntityDeclaration, row: &mut Row) -> VernierResult<()> {
        for (field, codec) in declaration.serialized_fields() {
            if let Some(value) = row.get_mut(field) {
                *value = self.encode(codec, value)?;
            }
        }
        Ok(())
    }

    /// Decode the declared serialized columns present in `row`, in place.
    pub fn decode_row(&self, declaration: &EntityDeclaration, row: &mut Row) -> VernierResult<()> {
        for (field, codec) in declaration.serialized_fields() {
            if let Some(value) = row.get_mut(field) {
                *value = self.decode(codec, value)?;
            }
        }
        Ok(())
    }

    pub fn decode_rows(&self, declaration: &EntityDeclaration, rows: &mut [Row]) -> VernierResult<()> {
        rows.iter_mut()
            .try_for_each(|row| self.decode_row(declaration, row))
    }
}
