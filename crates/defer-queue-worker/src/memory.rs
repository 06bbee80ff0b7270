//! In-process transactional host.
//!
//! Each tenant database is a set of record tables. A transaction works on
//! a snapshot of its tenant and publishes it on commit; rollback drops it.
//! Every declared entity type gets the built-in methods `search`,
//! `search_count`, `read`, `create`, `write`, `delete` and `get_rec_name`.
//! Custom methods registered on the [`ModelRegistry`] take precedence.

use crate::handler::ModelRegistry;
use async_trait::async_trait;
use defer_queue_core::{
    EntityRef, Host, HostError, Invocation, Map, Transaction, TransactionScope, UserId, Value,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Map>,
}

/// Record tables of one tenant
#[derive(Debug, Clone, Default)]
pub struct Records {
    version: u64,
    dirty: bool,
    tables: BTreeMap<String, Table>,
}

impl Records {
    fn row(&self, entity_type: &str, id: i64) -> Option<&Map> {
        self.tables.get(entity_type)?.rows.get(&id)
    }
}

/// What a method sees of its transaction.
pub struct Session<'a> {
    scope: &'a TransactionScope,
    registry: &'a ModelRegistry,
    records: &'a mut Records,
}

impl<'a> Session<'a> {
    fn new(scope: &'a TransactionScope, registry: &'a ModelRegistry, records: &'a mut Records) -> Self {
        Session {
            scope,
            registry,
            records,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.scope.database_name
    }

    pub fn user(&self) -> Option<UserId> {
        self.scope.user
    }

    pub fn context(&self) -> &Map {
        &self.scope.context
    }

    pub fn is_readonly(&self) -> bool {
        self.scope.readonly
    }

    fn check_model(&self, entity_type: &str) -> Result<(), HostError> {
        if self.registry.has_model(entity_type) {
            Ok(())
        } else {
            Err(HostError::UnknownEntityType(entity_type.to_string()))
        }
    }

    fn table_mut(&mut self, entity_type: &str) -> Result<&mut Table, HostError> {
        self.check_model(entity_type)?;
        if self.scope.readonly {
            return Err(HostError::ReadOnly);
        }
        self.records.dirty = true;
        Ok(self.records.tables.entry(entity_type.to_string()).or_default())
    }

    pub fn create(&mut self, entity_type: &str, mut values: Map) -> Result<EntityRef, HostError> {
        values.remove("id");
        let table = self.table_mut(entity_type)?;
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, values);
        Ok(EntityRef::new(entity_type, id))
    }

    pub fn write(&mut self, entity_type: &str, ids: &[i64], values: &Map) -> Result<(), HostError> {
        let table = self.table_mut(entity_type)?;
        for id in ids {
            let row = table
                .rows
                .get_mut(id)
                .ok_or_else(|| missing_record(entity_type, *id))?;
            for (field, value) in values.iter().filter(|(field, _)| field.as_str() != "id") {
                row.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, entity_type: &str, ids: &[i64]) -> Result<(), HostError> {
        let table = self.table_mut(entity_type)?;
        for id in ids {
            table
                .rows
                .remove(id)
                .ok_or_else(|| missing_record(entity_type, *id))?;
        }
        Ok(())
    }

    pub fn get(&self, entity_type: &str, id: i64) -> Option<&Map> {
        self.records.row(entity_type, id)
    }

    pub fn exists(&self, entity_type: &str, id: i64) -> bool {
        self.get(entity_type, id).is_some()
    }

    /// Ids matching `domain`, ascending
    pub fn search(
        &self,
        entity_type: &str,
        domain: &[Value],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<i64>, HostError> {
        self.check_model(entity_type)?;
        let Some(table) = self.records.tables.get(entity_type) else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        for (id, row) in &table.rows {
            if eval_domain(*id, row, domain)? {
                ids.push(*id);
            }
        }
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    pub fn count(&self, entity_type: &str, domain: &[Value]) -> Result<usize, HostError> {
        Ok(self.search(entity_type, domain, 0, None)?.len())
    }
}

fn missing_record(entity_type: &str, id: i64) -> HostError {
    HostError::Execution(format!("record {}({}) does not exist", entity_type, id))
}

fn invalid(reason: impl Into<String>) -> HostError {
    HostError::InvalidArguments(reason.into())
}

// Domains: [] matches all, leaves are [field, operator, value], an optional
// leading "AND"/"OR" selects how sibling clauses combine.

fn eval_domain(id: i64, row: &Map, domain: &[Value]) -> Result<bool, HostError> {
    let (any, clauses) = match domain.first().and_then(Value::as_str) {
        Some("OR") => (true, &domain[1..]),
        Some("AND") => (false, &domain[1..]),
        _ => (false, domain),
    };

    for clause in clauses {
        let hit = eval_clause(id, row, clause)?;
        if any && hit {
            return Ok(true);
        }
        if !any && !hit {
            return Ok(false);
        }
    }
    Ok(!any || clauses.is_empty())
}

fn eval_clause(id: i64, row: &Map, clause: &Value) -> Result<bool, HostError> {
    let items = clause
        .as_list()
        .ok_or_else(|| invalid(format!("domain clause must be a list, got {}", clause.kind())))?;

    match items {
        [Value::String(field), Value::String(operator), operand] => {
            let actual = if field == "id" {
                Value::Int(id)
            } else {
                row.get(field).cloned().unwrap_or(Value::Null)
            };
            eval_leaf(&actual, operator, operand)
        }
        nested => eval_domain(id, row, nested),
    }
}

fn eval_leaf(actual: &Value, operator: &str, operand: &Value) -> Result<bool, HostError> {
    let ordering = compare(actual, operand);
    Ok(match operator {
        "=" => ordering == Some(Ordering::Equal),
        "!=" => ordering != Some(Ordering::Equal),
        "<" => ordering == Some(Ordering::Less),
        "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ">" => ordering == Some(Ordering::Greater),
        ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        "in" | "not in" => {
            let candidates = operand
                .as_list()
                .ok_or_else(|| invalid(format!("operator {} expects a list", operator)))?;
            let found = candidates
                .iter()
                .any(|candidate| compare(actual, candidate) == Some(Ordering::Equal));
            found == (operator == "in")
        }
        "like" | "ilike" | "not like" | "not ilike" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| invalid(format!("operator {} expects a string", operator)))?;
            let hit = match actual.as_str() {
                Some(text) if operator.ends_with("ilike") => {
                    like(&text.to_lowercase(), &pattern.to_lowercase())
                }
                Some(text) => like(text, pattern),
                None => false,
            };
            hit != operator.starts_with("not")
        }
        other => return Err(invalid(format!("unsupported operator {}", other))),
    })
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (entity_id(left), entity_id(right)) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(&b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(&b)),
        (Value::Int(a), Value::Float(b)) => (a as f64).partial_cmp(&b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b),
        (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(&b)),
        (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&Decimal::from(b))),
        (Value::Int(a), Value::Decimal(b)) => Some(Decimal::from(a).cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(&b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(&b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(&b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Entity references compare by id
fn entity_id(value: &Value) -> Value {
    match value {
        Value::Entity(entity) => Value::Int(entity.id),
        other => other.clone(),
    }
}

/// SQL LIKE: `%` matches any run, `_` one character
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_at(&text, &pattern)
}

/// Linear-time wildcard match; on a mismatch only the last `%` is retried
fn like_at(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut retry: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                while pattern.get(p) == Some(&'%') {
                    p += 1;
                }
                retry = Some((p, t));
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match retry {
                Some((after_wildcard, matched_from)) => {
                    p = after_wildcard;
                    t = matched_from + 1;
                    retry = Some((after_wildcard, t));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

fn ids_of(value: &Value, entity_type: &str) -> Result<Vec<i64>, HostError> {
    let items = match value {
        Value::List(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };
    items
        .iter()
        .map(|item| match item {
            Value::Int(id) => Ok(*id),
            Value::Entity(entity) if entity.entity_type == entity_type => Ok(entity.id),
            other => Err(invalid(format!(
                "expected {} ids, got {}",
                entity_type,
                other.kind()
            ))),
        })
        .collect()
}

/// Records a call works on and where its remaining arguments start.
/// Instance calls work on the instance; model calls take ids first.
fn target_ids(call: &Invocation, name: &str) -> Result<(Vec<i64>, usize), HostError> {
    match &call.instance {
        Some(instance) => Ok((vec![instance.id], 0)),
        None => {
            let records = call
                .arg(0, name)
                .ok_or_else(|| invalid(format!("missing argument {}", name)))?;
            Ok((ids_of(records, &call.entity_type)?, 1))
        }
    }
}

fn list_arg<'v>(call: &'v Invocation, position: usize, name: &str) -> Result<&'v [Value], HostError> {
    match call.arg(position, name) {
        None | Some(Value::Null) => Ok(&[]),
        Some(value) => value
            .as_list()
            .ok_or_else(|| invalid(format!("{} must be a list", name))),
    }
}

fn usize_arg(call: &Invocation, position: usize, name: &str) -> Result<Option<usize>, HostError> {
    match call.arg(position, name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(format!("{} must be a non-negative integer", name))),
    }
}

/// Built-in methods. `None` when the method is not one of them.
fn call_builtin(session: &mut Session<'_>, call: &Invocation) -> Option<Result<Value, HostError>> {
    let result = match call.method_name.as_str() {
        "search" => search(session, call),
        "search_count" => search_count(session, call),
        "read" => read(session, call),
        "create" => create(session, call),
        "write" => write(session, call),
        "delete" => delete(session, call),
        "get_rec_name" => get_rec_name(session, call),
        _ => return None,
    };
    Some(result)
}

fn search(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let entity_type = call.entity_type.as_str();
    let domain = list_arg(call, 0, "domain")?;
    let offset = usize_arg(call, 1, "offset")?.unwrap_or(0);
    let limit = usize_arg(call, 2, "limit")?;

    let ids = session.search(entity_type, domain, offset, limit)?;
    Ok(Value::List(
        ids.into_iter()
            .map(|id| Value::Entity(EntityRef::new(entity_type, id)))
            .collect(),
    ))
}

fn search_count(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let domain = list_arg(call, 0, "domain")?;
    let count = session.count(&call.entity_type, domain)?;
    Ok(Value::Int(count as i64))
}

fn create(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let vlist = list_arg(call, 0, "vlist")?;
    let mut created = Vec::with_capacity(vlist.len());
    for values in vlist {
        let values = values
            .as_map()
            .ok_or_else(|| invalid("vlist must hold mappings"))?;
        created.push(Value::Entity(session.create(&call.entity_type, values.clone())?));
    }
    Ok(Value::List(created))
}

fn write(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let (ids, next) = target_ids(call, "records")?;
    let values = call
        .arg(next, "values")
        .and_then(Value::as_map)
        .ok_or_else(|| invalid("values must be a mapping"))?;
    session.write(&call.entity_type, &ids, values)?;
    Ok(Value::Null)
}

fn delete(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let (ids, _) = target_ids(call, "records")?;
    session.delete(&call.entity_type, &ids)?;
    Ok(Value::Null)
}

fn get_rec_name(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let instance = call
        .instance
        .as_ref()
        .ok_or_else(|| invalid("get_rec_name is called on an instance"))?;
    let row = session
        .get(&call.entity_type, instance.id)
        .ok_or_else(|| missing_record(&call.entity_type, instance.id))?;

    let name = ["rec_name", "name"]
        .iter()
        .find_map(|field| row.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{},{}", call.entity_type, instance.id));
    Ok(Value::String(name))
}

fn read(session: &mut Session<'_>, call: &Invocation) -> Result<Value, HostError> {
    let entity_type = call.entity_type.as_str();
    let (ids, next) = target_ids(call, "ids")?;
    let fields = match call.arg(next, "fields_names") {
        None | Some(Value::Null) => None,
        Some(Value::List(fields)) => Some(
            fields
                .iter()
                .map(|field| {
                    field
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("fields_names must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(_) => return Err(invalid("fields_names must be a list")),
    };

    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        let row = session
            .get(entity_type, id)
            .ok_or_else(|| missing_record(entity_type, id))?;
        let mut out = match &fields {
            Some(fields) => fields
                .iter()
                .filter(|field| field.as_str() != "id")
                .map(|field| (field.clone(), row.get(field).cloned().unwrap_or(Value::Null)))
                .collect(),
            None => row.clone(),
        };
        out.insert("id".to_string(), Value::Int(id));
        rows.push(Value::Map(out));
    }
    Ok(Value::List(rows))
}

/// Reference [`Host`] keeping tenant databases in memory
pub struct MemoryHost {
    databases: RwLock<HashMap<String, Arc<Mutex<Records>>>>,
    registry: Arc<ModelRegistry>,
    initialized: RwLock<HashSet<String>>,
}

impl MemoryHost {
    pub fn new(registry: ModelRegistry) -> Self {
        MemoryHost {
            databases: RwLock::new(HashMap::new()),
            registry: Arc::new(registry),
            initialized: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_database(self, name: impl Into<String>) -> Self {
        self.add_database(name);
        self
    }

    pub fn add_database(&self, name: impl Into<String>) {
        self.databases.write().entry(name.into()).or_default();
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn is_initialized(&self, database_name: &str) -> bool {
        self.initialized.read().contains(database_name)
    }

    fn database(&self, name: &str) -> Result<Arc<Mutex<Records>>, HostError> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::UnknownDatabase(name.to_string()))
    }

    /// Insert a committed record outside any transaction
    pub fn seed(&self, database_name: &str, entity_type: &str, values: Map) -> Result<EntityRef, HostError> {
        let database = self.database(database_name)?;
        let mut records = database.lock();
        let scope = TransactionScope {
            readonly: false,
            ..TransactionScope::readonly(database_name)
        };
        let created = Session::new(&scope, &self.registry, &mut records).create(entity_type, values)?;
        records.version += 1;
        records.dirty = false;
        Ok(created)
    }

    /// Committed rows of an entity type, by id
    pub fn rows(&self, database_name: &str, entity_type: &str) -> Result<Vec<(i64, Map)>, HostError> {
        let database = self.database(database_name)?;
        let records = database.lock();
        Ok(records
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .map(|(id, row)| (*id, row.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn init_registry(&self, database_name: &str) -> Result<(), HostError> {
        self.database(database_name)?;
        if self.initialized.write().insert(database_name.to_string()) {
            info!(
                database = %database_name,
                models = self.registry.models().len(),
                "Model registry ready"
            );
        }
        Ok(())
    }

    async fn begin(&self, scope: TransactionScope) -> Result<Box<dyn Transaction>, HostError> {
        let committed = self.database(&scope.database_name)?;
        let mut working = committed.lock().clone();
        working.dirty = false;
        debug!(database = %scope.database_name, user = ?scope.user, readonly = scope.readonly, "Transaction started");

        Ok(Box::new(MemoryTransaction {
            committed,
            working,
            scope,
            registry: self.registry.clone(),
        }))
    }
}

struct MemoryTransaction {
    committed: Arc<Mutex<Records>>,
    working: Records,
    scope: TransactionScope,
    registry: Arc<ModelRegistry>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, call: &Invocation) -> Result<Value, HostError> {
        if !self.registry.has_model(&call.entity_type) {
            return Err(HostError::UnknownEntityType(call.entity_type.clone()));
        }
        if let Some(instance) = &call.instance {
            if self.working.row(&instance.entity_type, instance.id).is_none() {
                return Err(missing_record(&instance.entity_type, instance.id));
            }
        }

        let handler = self.registry.get(&call.entity_type, &call.method_name);
        let mut session = Session::new(&self.scope, &self.registry, &mut self.working);
        match handler {
            Some(handler) => handler.call(&mut session, call).await,
            None => call_builtin(&mut session, call).unwrap_or_else(|| {
                Err(HostError::UnknownMethod {
                    entity_type: call.entity_type.clone(),
                    method_name: call.method_name.clone(),
                })
            }),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), HostError> {
        let MemoryTransaction {
            committed,
            mut working,
            scope,
            ..
        } = *self;
        if !working.dirty {
            return Ok(());
        }

        let mut current = committed.lock();
        if current.version != working.version {
            return Err(HostError::Execution(format!(
                "database {} changed since the transaction started",
                scope.database_name
            )));
        }
        working.version += 1;
        working.dirty = false;
        *current = working;
        debug!(database = %scope.database_name, "Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), HostError> {
        debug!(database = %self.scope.database_name, "Transaction rolled back");
        Ok(())
    }

    fn resolve_entity(&self, reference: EntityRef) -> Result<EntityRef, String> {
        if !self.registry.has_model(&reference.entity_type) {
            return Err(format!("unknown entity type {}", reference.entity_type));
        }
        match self.working.row(&reference.entity_type, reference.id) {
            Some(_) => Ok(reference),
            None => Err(format!("{} does not exist", reference)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> MemoryHost {
        let registry = ModelRegistry::new();
        registry.declare("party.party");
        let host = MemoryHost::new(registry).with_database("shop");
        for name in ["Alice", "Bob", "Carol"] {
            let mut values = Map::new();
            values.insert("name".to_string(), Value::from(name));
            host.seed("shop", "party.party", values).unwrap();
        }
        host
    }

    fn clause(field: &str, operator: &str, value: impl Into<Value>) -> Value {
        Value::List(vec![Value::from(field), Value::from(operator), value.into()])
    }

    async fn run(host: &MemoryHost, call: Invocation) -> Result<Value, HostError> {
        let mut tx = host
            .begin(TransactionScope {
                readonly: false,
                ..TransactionScope::readonly("shop")
            })
            .await
            .unwrap();
        let result = tx.execute(&call).await;
        tx.commit().await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_search_with_domain_and_limit() {
        let host = host();

        let all = run(&host, Invocation::on_type("party.party", "search").with_args(vec![Value::List(vec![])]))
            .await
            .unwrap();
        assert_eq!(all.as_list().unwrap().len(), 3);

        let mut kwargs = Map::new();
        kwargs.insert("limit".to_string(), Value::Int(1));
        let limited = run(
            &host,
            Invocation::on_type("party.party", "search")
                .with_args(vec![Value::List(vec![clause("name", "ilike", "%o%")])])
                .with_kwargs(kwargs),
        )
        .await
        .unwrap();
        assert_eq!(
            limited,
            Value::List(vec![Value::Entity(EntityRef::new("party.party", 2))])
        );
    }

    #[tokio::test]
    async fn test_or_domain_and_count() {
        let host = host();
        let domain = Value::List(vec![
            Value::from("OR"),
            clause("name", "=", "Alice"),
            clause("id", "in", Value::List(vec![Value::Int(3)])),
        ]);

        let count = run(&host, Invocation::on_type("party.party", "search_count").with_args(vec![domain]))
            .await
            .unwrap();
        assert_eq!(count, Value::Int(2));
    }

    #[tokio::test]
    async fn test_create_read_write_delete() {
        let host = host();

        let mut values = Map::new();
        values.insert("name".to_string(), Value::from("Dave"));
        let created = run(
            &host,
            Invocation::on_type("party.party", "create").with_args(vec![Value::List(vec![Value::Map(values)])]),
        )
        .await
        .unwrap();
        let dave = created.as_list().unwrap()[0].as_entity().unwrap().clone();
        assert_eq!(dave.id, 4);

        let mut update = Map::new();
        update.insert("name".to_string(), Value::from("David"));
        run(
            &host,
            Invocation::on_instance(dave.clone(), "write").with_args(vec![Value::Map(update)]),
        )
        .await
        .unwrap();

        let read = run(
            &host,
            Invocation::on_type("party.party", "read").with_args(vec![
                Value::List(vec![Value::Int(dave.id)]),
                Value::List(vec![Value::from("name")]),
            ]),
        )
        .await
        .unwrap();
        let row = read.as_list().unwrap()[0].as_map().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("David")));
        assert_eq!(row.get("id"), Some(&Value::Int(4)));

        run(
            &host,
            Invocation::on_type("party.party", "delete").with_args(vec![Value::Entity(dave)]),
        )
        .await
        .unwrap();
        assert_eq!(host.rows("shop", "party.party").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_rec_name() {
        let host = host();
        let name = run(
            &host,
            Invocation::on_instance(EntityRef::new("party.party", 2), "get_rec_name")
                .with_args(vec![Value::from("name")]),
        )
        .await
        .unwrap();
        assert_eq!(name, Value::from("Bob"));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let host = host();
        let mut tx = host
            .begin(TransactionScope {
                readonly: false,
                ..TransactionScope::readonly("shop")
            })
            .await
            .unwrap();
        tx.execute(&Invocation::on_type("party.party", "delete").with_args(vec![Value::Int(1)]))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(host.rows("shop", "party.party").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_readonly_rejects_writes() {
        let host = host();
        let mut tx = host.begin(TransactionScope::readonly("shop")).await.unwrap();
        let result = tx
            .execute(&Invocation::on_type("party.party", "delete").with_args(vec![Value::Int(1)]))
            .await;
        assert!(matches!(result, Err(HostError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_concurrent_commit_rejected() {
        let host = host();
        let scope = TransactionScope {
            readonly: false,
            ..TransactionScope::readonly("shop")
        };
        let mut first = host.begin(scope.clone()).await.unwrap();
        let mut second = host.begin(scope).await.unwrap();

        let delete = |id: i64| Invocation::on_type("party.party", "delete").with_args(vec![Value::Int(id)]);
        first.execute(&delete(1)).await.unwrap();
        second.execute(&delete(2)).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(HostError::Execution(_))));
    }

    #[tokio::test]
    async fn test_unknown_method_and_type() {
        let host = host();
        assert!(matches!(
            run(&host, Invocation::on_type("party.party", "explode")).await,
            Err(HostError::UnknownMethod { .. })
        ));
        assert!(matches!(
            run(&host, Invocation::on_type("account.move", "search")).await,
            Err(HostError::UnknownEntityType(_))
        ));
        assert!(matches!(
            host.begin(TransactionScope::readonly("other")).await,
            Err(HostError::UnknownDatabase(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_entity() {
        let host = host();
        let tx = host.begin(TransactionScope::readonly("shop")).await.unwrap();
        assert!(tx.resolve_entity(EntityRef::new("party.party", 1)).is_ok());
        assert!(tx.resolve_entity(EntityRef::new("party.party", 99)).is_err());
        assert!(tx.resolve_entity(EntityRef::new("account.move", 1)).is_err());
    }

    #[test]
    fn test_like_patterns() {
        assert!(like("Alice", "A%"));
        assert!(like("Alice", "%li%"));
        assert!(like("Bob", "B_b"));
        assert!(!like("Bob", "B_"));
        assert!(like("", "%"));
        assert!(like("abc", "%%c"));
        assert!(!like("abc", "a%b"));
        assert!(like("aab", "%ab"));
    }

    #[test]
    fn test_like_many_wildcards_is_fast() {
        let text = "a".repeat(40);
        let pattern = format!("{}b", "%".repeat(12));
        let started = std::time::Instant::now();
        assert!(!like(&text, &pattern));
        assert!(like(&format!("{}b", text), &pattern));
        assert!(like(&text, &"%a_".repeat(12)));
        assert!(!like(&text, &format!("{}b", "%a_".repeat(12))));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
