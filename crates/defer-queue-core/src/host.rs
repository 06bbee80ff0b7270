//! The executor capability provided by the host system.
//!
//! A [`Host`] resolves entity types to invocable methods and runs them
//! inside a [`Transaction`] bound to `(database_name, user, context)`.
//! Side effects become visible only on [`Transaction::commit`].

use crate::codec::EntityResolver;
use crate::envelope::{EnvelopeHeader, Invocation};
use crate::error::HostError;
use crate::value::{EntityRef, Map, UserId, Value};
use async_trait::async_trait;

/// What a transaction is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionScope {
    pub database_name: String,
    /// `None` runs without a specific user
    pub user: Option<UserId>,
    pub context: Map,
    pub readonly: bool,
}

impl TransactionScope {
    /// Read-only scope with no user and an empty context.
    pub fn readonly(database_name: impl Into<String>) -> Self {
        TransactionScope {
            database_name: database_name.into(),
            user: None,
            context: Map::new(),
            readonly: true,
        }
    }

    /// Read-write scope for the user and context of an envelope.
    pub fn for_header(header: &EnvelopeHeader) -> Self {
        TransactionScope {
            database_name: header.database_name.clone(),
            user: Some(header.user),
            context: header.context.clone(),
            readonly: false,
        }
    }
}

#[async_trait]
pub trait Host: Send + Sync {
    /// Load the model registry of a tenant. Repeated calls reuse it.
    async fn init_registry(&self, database_name: &str) -> Result<(), HostError>;

    async fn begin(&self, scope: TransactionScope) -> Result<Box<dyn Transaction>, HostError>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Invoke a method. Effects stay pending until commit.
    async fn execute(&mut self, call: &Invocation) -> Result<Value, HostError>;

    async fn commit(self: Box<Self>) -> Result<(), HostError>;

    async fn rollback(self: Box<Self>) -> Result<(), HostError>;

    /// Check that a referenced entity exists in this transaction.
    fn resolve_entity(&self, reference: EntityRef) -> Result<EntityRef, String>;
}

impl EntityResolver for Box<dyn Transaction> {
    fn resolve(&self, reference: EntityRef) -> Result<EntityRef, String> {
        self.resolve_entity(reference)
    }
}
