//! Read paths over the latest committed state
//!
//! Queries bypass [`Session`](crate::repository::Session) entirely, so they
//! never record versions and can never cause or suffer a conflict.
use crate::entity::{RecOrder, User};
use crate::error::{LedgerError, Result};
use crate::receivable::Receivable;
use crate::repository::{self, Entity, Store};

pub struct QueryEngine<'s> {
    store: &'s dyn Store,
}

impl<'s> QueryEngine<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        Self { store }
    }

    fn one<E: Entity>(&self, key: &str) -> Result<E> {
        repository::load(self.store, key)?.ok_or_else(|| LedgerError::not_found(E::KIND, key))
    }

    pub fn user(&self, id: &str) -> Result<User> {
        self.one(id)
    }

    pub fn order(&self, order_no: &str) -> Result<RecOrder> {
        self.one(order_no)
    }

    pub fn receivable(&self, receivable_no: &str) -> Result<Receivable> {
        self.one(receivable_no)
    }

    // iteration order is whatever the store yields, callers must not rely on it
    pub fn all_users(&self) -> impl Iterator<Item = Result<User>> + 's {
        repository::iter_all(self.store)
    }

    pub fn all_orders(&self) -> impl Iterator<Item = Result<RecOrder>> + 's {
        repository::iter_all(self.store)
    }

    pub fn all_receivables(&self) -> impl Iterator<Item = Result<Receivable>> + 's {
        repository::iter_all(self.store)
    }
}
