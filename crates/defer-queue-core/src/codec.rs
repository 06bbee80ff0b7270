//! Conversion between [`Value`] trees and transport-safe JSON.
//!
//! Rich values are written as objects carrying a `__class__` tag next to
//! their fields, so the receiving side can rebuild the exact type:
//!
//! ```text
//! {"__class__": "date", "year": 2014, "month": 3, "day": 12}
//! {"__class__": "Decimal", "decimal": "10.50"}
//! {"__class__": "Model", "model": "party.party", "id": 7}
//! ```
//!
//! Objects whose tag is unknown (or not registered with the codec doing the
//! decoding) are kept as plain maps.

use crate::error::{DecodeError, EncodeError};
use crate::value::{EntityRef, Map, Value};
use base64::Engine;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde_json::{Map as JsonMap, Number, Value as Json};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Reserved key carrying the type tag of an encoded rich value.
pub const CLASS_KEY: &str = "__class__";

/// Rich types the codec knows how to tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    DateTime,
    Date,
    Time,
    Decimal,
    Bytes,
    Entity,
}

impl TypeTag {
    pub const ALL: [TypeTag; 6] = [
        TypeTag::DateTime,
        TypeTag::Date,
        TypeTag::Time,
        TypeTag::Decimal,
        TypeTag::Bytes,
        TypeTag::Entity,
    ];

    /// Tag string written under [`CLASS_KEY`].
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::DateTime => "datetime",
            TypeTag::Date => "date",
            TypeTag::Time => "time",
            TypeTag::Decimal => "Decimal",
            TypeTag::Bytes => "buffer",
            TypeTag::Entity => "Model",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "datetime" => Some(TypeTag::DateTime),
            "date" => Some(TypeTag::Date),
            "time" => Some(TypeTag::Time),
            "Decimal" => Some(TypeTag::Decimal),
            "buffer" => Some(TypeTag::Bytes),
            "Model" => Some(TypeTag::Entity),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks entity references up in the host registry while decoding.
///
/// Decoding an entity is not a pure operation: the referenced type and
/// record must still exist in the context doing the decoding.
pub trait EntityResolver {
    fn resolve(&self, reference: EntityRef) -> Result<EntityRef, String>;
}

/// Resolver that accepts every reference as-is. Used where no registry is
/// reachable, e.g. a caller decoding its own result.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncheckedResolver;

impl EntityResolver for UncheckedResolver {
    fn resolve(&self, reference: EntityRef) -> Result<EntityRef, String> {
        Ok(reference)
    }
}

/// Table of the rich types this process encodes and decodes.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    tags: BTreeSet<TypeTag>,
}

impl Codec {
    /// Empty table: only JSON primitives, lists and maps are accepted.
    pub fn new() -> Self {
        Codec {
            tags: BTreeSet::new(),
        }
    }

    /// Table with every [`TypeTag`] registered.
    pub fn standard() -> Self {
        TypeTag::ALL
            .iter()
            .fold(Codec::new(), |codec, tag| codec.register(*tag))
    }

    pub fn register(mut self, tag: TypeTag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn is_registered(&self, tag: TypeTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Encode a value tree into JSON.
    pub fn encode(&self, value: &Value) -> Result<Json, EncodeError> {
        let encoded = match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Json::Number(
                Number::from_f64(*f).ok_or(EncodeError::NonFiniteFloat(*f))?,
            ),
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => Json::Object(self.encode_map(map)?),
            Value::DateTime(dt) => {
                let mut obj = self.tagged(TypeTag::DateTime)?;
                put_date(&mut obj, &dt.date());
                put_time(&mut obj, &dt.time());
                Json::Object(obj)
            }
            Value::Date(d) => {
                let mut obj = self.tagged(TypeTag::Date)?;
                put_date(&mut obj, d);
                Json::Object(obj)
            }
            Value::Time(t) => {
                let mut obj = self.tagged(TypeTag::Time)?;
                put_time(&mut obj, t);
                Json::Object(obj)
            }
            Value::Decimal(d) => {
                let mut obj = self.tagged(TypeTag::Decimal)?;
                obj.insert("decimal".to_string(), Json::String(d.to_string()));
                Json::Object(obj)
            }
            Value::Bytes(bytes) => {
                let mut obj = self.tagged(TypeTag::Bytes)?;
                obj.insert(
                    "base64".to_string(),
                    Json::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
                );
                Json::Object(obj)
            }
            Value::Entity(entity) => {
                let mut obj = self.tagged(TypeTag::Entity)?;
                obj.insert("model".to_string(), Json::String(entity.entity_type.clone()));
                obj.insert("id".to_string(), Json::Number(entity.id.into()));
                Json::Object(obj)
            }
        };
        Ok(encoded)
    }

    /// Encode a mapping into a JSON object.
    pub fn encode_map(&self, map: &Map) -> Result<JsonMap<String, Json>, EncodeError> {
        if let Some(Value::String(tag)) = map.get(CLASS_KEY) {
            if TypeTag::from_str(tag).is_some() {
                return Err(EncodeError::ReservedKey(tag.clone()));
            }
        }
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.encode(value)?)))
            .collect()
    }

    /// Encode a value tree straight to its JSON text.
    pub fn encode_to_string(&self, value: &Value) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(&self.encode(value)?)?)
    }

    /// Decode a JSON tree, resolving entity references through `resolver`.
    pub fn decode(&self, json: Json, resolver: &dyn EntityResolver) -> Result<Value, DecodeError> {
        let value = match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.decode(item, resolver))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(obj) => match self.registered_tag(&obj) {
                Some(tag) => self.decode_tagged(tag, &obj, resolver)?,
                None => Value::Map(self.decode_map(obj, resolver)?),
            },
        };
        Ok(value)
    }

    /// Decode a JSON object as a plain mapping.
    pub fn decode_map(
        &self,
        obj: JsonMap<String, Json>,
        resolver: &dyn EntityResolver,
    ) -> Result<Map, DecodeError> {
        obj.into_iter()
            .map(|(key, value)| Ok((key, self.decode(value, resolver)?)))
            .collect()
    }

    /// Parse and decode JSON text.
    pub fn decode_str(&self, text: &str, resolver: &dyn EntityResolver) -> Result<Value, DecodeError> {
        self.decode(serde_json::from_str(text)?, resolver)
    }

    fn tagged(&self, tag: TypeTag) -> Result<JsonMap<String, Json>, EncodeError> {
        if !self.is_registered(tag) {
            return Err(EncodeError::UnsupportedType(tag));
        }
        let mut obj = JsonMap::new();
        obj.insert(CLASS_KEY.to_string(), Json::String(tag.as_str().to_string()));
        Ok(obj)
    }

    fn registered_tag(&self, obj: &JsonMap<String, Json>) -> Option<TypeTag> {
        obj.get(CLASS_KEY)
            .and_then(Json::as_str)
            .and_then(TypeTag::from_str)
            .filter(|tag| self.is_registered(*tag))
    }

    fn decode_tagged(
        &self,
        tag: TypeTag,
        obj: &JsonMap<String, Json>,
        resolver: &dyn EntityResolver,
    ) -> Result<Value, DecodeError> {
        let value = match tag {
            TypeTag::DateTime => {
                Value::DateTime(NaiveDateTime::new(read_date(tag, obj)?, read_time(tag, obj)?))
            }
            TypeTag::Date => Value::Date(read_date(tag, obj)?),
            TypeTag::Time => Value::Time(read_time(tag, obj)?),
            TypeTag::Decimal => {
                let text = str_field(tag, obj, "decimal")?;
                let decimal = Decimal::from_str(text)
                    .or_else(|_| Decimal::from_scientific(text))
                    .map_err(|e| malformed(tag, format!("'{}': {}", text, e)))?;
                Value::Decimal(decimal)
            }
            TypeTag::Bytes => {
                // Line-wrapped base64 is accepted.
                let text: String = str_field(tag, obj, "base64")?
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(text)
                    .map_err(|e| malformed(tag, e.to_string()))?;
                Value::Bytes(bytes)
            }
            TypeTag::Entity => {
                let reference = EntityRef::new(
                    str_field(tag, obj, "model")?,
                    int_field(tag, obj, "id")?,
                );
                let (entity_type, id) = (reference.entity_type.clone(), reference.id);
                let resolved = resolver
                    .resolve(reference)
                    .map_err(|reason| DecodeError::Unresolvable {
                        entity_type,
                        id,
                        reason,
                    })?;
                Value::Entity(resolved)
            }
        };
        Ok(value)
    }
}

fn put_date(obj: &mut JsonMap<String, Json>, date: &NaiveDate) {
    obj.insert("year".to_string(), date.year().into());
    obj.insert("month".to_string(), date.month().into());
    obj.insert("day".to_string(), date.day().into());
}

fn put_time(obj: &mut JsonMap<String, Json>, time: &NaiveTime) {
    obj.insert("hour".to_string(), time.hour().into());
    obj.insert("minute".to_string(), time.minute().into());
    obj.insert("second".to_string(), time.second().into());
    // Microsecond precision on the wire; leap seconds keep their extra second.
    obj.insert("microsecond".to_string(), (time.nanosecond() / 1_000).into());
}

fn read_date(tag: TypeTag, obj: &JsonMap<String, Json>) -> Result<NaiveDate, DecodeError> {
    let year = i32::try_from(int_field(tag, obj, "year")?)
        .map_err(|_| malformed(tag, "year out of range"))?;
    let month = u32_field(tag, obj, "month")?;
    let day = u32_field(tag, obj, "day")?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| malformed(tag, format!("invalid date {}-{}-{}", year, month, day)))
}

fn read_time(tag: TypeTag, obj: &JsonMap<String, Json>) -> Result<NaiveTime, DecodeError> {
    let hour = u32_field(tag, obj, "hour")?;
    let minute = u32_field(tag, obj, "minute")?;
    let second = u32_field(tag, obj, "second")?;
    let microsecond = u32_field(tag, obj, "microsecond")?;
    NaiveTime::from_hms_micro_opt(hour, minute, second, microsecond).ok_or_else(|| {
        malformed(
            tag,
            format!("invalid time {}:{}:{}.{}", hour, minute, second, microsecond),
        )
    })
}

fn int_field(tag: TypeTag, obj: &JsonMap<String, Json>, name: &str) -> Result<i64, DecodeError> {
    obj.get(name)
        .and_then(Json::as_i64)
        .ok_or_else(|| malformed(tag, format!("missing integer field '{}'", name)))
}

fn u32_field(tag: TypeTag, obj: &JsonMap<String, Json>, name: &str) -> Result<u32, DecodeError> {
    u32::try_from(int_field(tag, obj, name)?)
        .map_err(|_| malformed(tag, format!("field '{}' out of range", name)))
}

fn str_field<'a>(
    tag: TypeTag,
    obj: &'a JsonMap<String, Json>,
    name: &str,
) -> Result<&'a str, DecodeError> {
    obj.get(name)
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(tag, format!("missing string field '{}'", name)))
}

fn malformed(tag: TypeTag, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedTag {
        tag,
        reason: reason.into(),
    }
}
