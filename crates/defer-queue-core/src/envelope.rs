use crate::codec::{Codec, EntityResolver};
use crate::error::{DecodeError, EncodeError};
use crate::value::{EntityRef, Map, UserId, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};
use uuid::Uuid;

/// Default visibility timeout of a result queue, in seconds
pub const DEFAULT_VISIBILITY_TIMEOUT: u32 = 60;

/// How the outcome of a deferred call is handled.
///
/// Travels on the wire as the pair `[ignore_result, visibility_timeout]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultOptions {
    /// No result queue is created when set
    pub ignore_result: bool,
    /// Visibility timeout applied to the result queue, in seconds
    pub visibility_timeout: u32,
}

impl ResultOptions {
    pub fn new(ignore_result: bool, visibility_timeout: u32) -> Self {
        ResultOptions {
            ignore_result,
            visibility_timeout,
        }
    }

    /// Options requesting that the result be published.
    pub fn keep_result() -> Self {
        ResultOptions::new(false, DEFAULT_VISIBILITY_TIMEOUT)
    }

    fn to_json(self) -> Json {
        json!([self.ignore_result, self.visibility_timeout])
    }

    fn from_json(json: &Json) -> Result<Self, DecodeError> {
        let invalid = |reason: &str| DecodeError::InvalidField {
            field: "result_options",
            reason: reason.to_string(),
        };
        match json.as_array().map(Vec::as_slice) {
            Some([ignore, timeout]) => {
                let ignore_result = ignore.as_bool().ok_or_else(|| invalid("expected bool"))?;
                let visibility_timeout = timeout
                    .as_u64()
                    .and_then(|t| u32::try_from(t).ok())
                    .ok_or_else(|| invalid("expected non-negative integer"))?;
                Ok(ResultOptions::new(ignore_result, visibility_timeout))
            }
            _ => Err(invalid("expected [ignore_result, visibility_timeout]")),
        }
    }
}

impl Default for ResultOptions {
    fn default() -> Self {
        ResultOptions::new(true, DEFAULT_VISIBILITY_TIMEOUT)
    }
}

/// A method call on an entity type, optionally bound to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub entity_type: String,
    pub method_name: String,
    pub instance: Option<EntityRef>,
    pub args: Vec<Value>,
    pub kwargs: Map,
}

impl Invocation {
    /// Call on the entity type itself.
    pub fn on_type(entity_type: impl Into<String>, method_name: impl Into<String>) -> Self {
        Invocation {
            entity_type: entity_type.into(),
            method_name: method_name.into(),
            instance: None,
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Call bound to `instance`; its type becomes the entity type.
    pub fn on_instance(instance: EntityRef, method_name: impl Into<String>) -> Self {
        Invocation {
            entity_type: instance.entity_type.clone(),
            method_name: method_name.into(),
            instance: Some(instance),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Look a keyword argument up, falling back to the positional slot.
    pub fn arg(&self, position: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(position))
    }
}

/// Identity part of an envelope: where and as whom the task runs.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeHeader {
    pub database_name: String,
    pub user: UserId,
    pub context: Map,
}

/// Message body sent to the task queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEnvelope {
    pub database_name: String,
    pub user: UserId,
    pub context: Map,
    pub call: Invocation,
    pub result_uuid: Uuid,
    pub result_options: ResultOptions,
}

impl TaskEnvelope {
    /// Build an envelope, minting a fresh `result_uuid`.
    pub fn new(header: EnvelopeHeader, call: Invocation, result_options: ResultOptions) -> Self {
        TaskEnvelope {
            database_name: header.database_name,
            user: header.user,
            context: header.context,
            call,
            result_uuid: Uuid::new_v4(),
            result_options,
        }
    }

    /// Name of the result queue for this task.
    pub fn result_queue_name(&self) -> String {
        self.result_uuid.to_string()
    }

    /// Encode the full envelope to its message body.
    pub fn encode(&self, codec: &Codec) -> Result<String, EncodeError> {
        let instance = match &self.call.instance {
            Some(instance) => codec.encode(&Value::Entity(instance.clone()))?,
            None => Json::Null,
        };
        let args = self
            .call
            .args
            .iter()
            .map(|arg| codec.encode(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = JsonMap::new();
        body.insert("database_name".to_string(), json!(self.database_name));
        body.insert("user".to_string(), json!(self.user));
        body.insert("entity_type".to_string(), json!(self.call.entity_type));
        body.insert("method_name".to_string(), json!(self.call.method_name));
        body.insert("instance".to_string(), instance);
        body.insert("args".to_string(), Json::Array(args));
        body.insert("kwargs".to_string(), Json::Object(codec.encode_map(&self.call.kwargs)?));
        body.insert("context".to_string(), Json::Object(codec.encode_map(&self.context)?));
        body.insert("result_uuid".to_string(), json!(self.result_uuid.to_string()));
        body.insert("result_options".to_string(), self.result_options.to_json());

        Ok(serde_json::to_string(&Json::Object(body))?)
    }

    /// Decode only the header fields, leaving the call untouched.
    pub fn decode_header(
        body: &str,
        codec: &Codec,
        resolver: &dyn EntityResolver,
    ) -> Result<EnvelopeHeader, DecodeError> {
        let mut obj = parse_object(body)?;
        read_header(&mut obj, codec, resolver)
    }

    /// Decode the full envelope.
    pub fn decode(
        body: &str,
        codec: &Codec,
        resolver: &dyn EntityResolver,
    ) -> Result<Self, DecodeError> {
        let mut obj = parse_object(body)?;
        let header = read_header(&mut obj, codec, resolver)?;

        let instance = match take(&mut obj, "instance").unwrap_or(Json::Null) {
            Json::Null => None,
            json => match codec.decode(json, resolver)? {
                Value::Entity(entity) => Some(entity),
                other => {
                    return Err(DecodeError::InvalidField {
                        field: "instance",
                        reason: format!("expected entity reference, got {}", other.kind()),
                    })
                }
            },
        };
        let entity_type = match (&instance, take(&mut obj, "entity_type")) {
            (Some(instance), _) => instance.entity_type.clone(),
            (None, Some(Json::String(entity_type))) => entity_type,
            (None, Some(_)) => {
                return Err(DecodeError::InvalidField {
                    field: "entity_type",
                    reason: "expected string".to_string(),
                })
            }
            (None, None) => return Err(DecodeError::MissingField("entity_type")),
        };
        let method_name = take_string(&mut obj, "method_name")?;

        let args = match take(&mut obj, "args").unwrap_or(Json::Array(Vec::new())) {
            Json::Array(items) => items
                .into_iter()
                .map(|item| codec.decode(item, resolver))
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(DecodeError::InvalidField {
                    field: "args",
                    reason: "expected array".to_string(),
                })
            }
        };
        let kwargs = take_map(&mut obj, "kwargs", codec, resolver)?;

        let result_uuid = Uuid::parse_str(&take_string(&mut obj, "result_uuid")?).map_err(|e| {
            DecodeError::InvalidField {
                field: "result_uuid",
                reason: e.to_string(),
            }
        })?;
        let result_options = match take(&mut obj, "result_options") {
            Some(json) => ResultOptions::from_json(&json)?,
            None => ResultOptions::default(),
        };

        Ok(TaskEnvelope {
            database_name: header.database_name,
            user: header.user,
            context: header.context,
            call: Invocation {
                entity_type,
                method_name,
                instance,
                args,
                kwargs,
            },
            result_uuid,
            result_options,
        })
    }
}

/// Message body sent to a result queue: `{"result": <value>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub result: Value,
}

impl ResultEnvelope {
    pub fn new(result: Value) -> Self {
        ResultEnvelope { result }
    }

    pub fn encode(&self, codec: &Codec) -> Result<String, EncodeError> {
        let body = json!({ "result": codec.encode(&self.result)? });
        Ok(serde_json::to_string(&body)?)
    }

    pub fn decode(
        body: &str,
        codec: &Codec,
        resolver: &dyn EntityResolver,
    ) -> Result<Self, DecodeError> {
        let mut obj = parse_object(body)?;
        let result = take(&mut obj, "result").ok_or(DecodeError::MissingField("result"))?;
        Ok(ResultEnvelope {
            result: codec.decode(result, resolver)?,
        })
    }
}

fn parse_object(body: &str) -> Result<JsonMap<String, Json>, DecodeError> {
    match serde_json::from_str(body)? {
        Json::Object(obj) => Ok(obj),
        _ => Err(DecodeError::InvalidField {
            field: "body",
            reason: "expected JSON object".to_string(),
        }),
    }
}

fn read_header(
    obj: &mut JsonMap<String, Json>,
    codec: &Codec,
    resolver: &dyn EntityResolver,
) -> Result<EnvelopeHeader, DecodeError> {
    let database_name = take_string(obj, "database_name")?;
    let user = take(obj, "user")
        .ok_or(DecodeError::MissingField("user"))?
        .as_i64()
        .ok_or_else(|| DecodeError::InvalidField {
            field: "user",
            reason: "expected integer".to_string(),
        })?;
    let context = take_map(obj, "context", codec, resolver)?;
    Ok(EnvelopeHeader {
        database_name,
        user,
        context,
    })
}

fn take(obj: &mut JsonMap<String, Json>, field: &'static str) -> Option<Json> {
    obj.remove(field)
}

fn take_string(obj: &mut JsonMap<String, Json>, field: &'static str) -> Result<String, DecodeError> {
    match take(obj, field) {
        Some(Json::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            reason: "expected string".to_string(),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn take_map(
    obj: &mut JsonMap<String, Json>,
    field: &'static str,
    codec: &Codec,
    resolver: &dyn EntityResolver,
) -> Result<Map, DecodeError> {
    match take(obj, field) {
        Some(Json::Object(map)) => codec.decode_map(map, resolver),
        Some(Json::Null) | None => Ok(Map::new()),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            reason: "expected object".to_string(),
        }),
    }
}
