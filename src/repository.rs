//! Entity repository over a versioned key-value store
//!
//! Every stored value is a [`Record`]: the CBOR body of an entity plus the
//! version it was committed at. A [`Session`] remembers the version of every
//! key it reads and buffers its writes; on commit the store re-checks those
//! versions and applies all writes or none.
use crate::entity::{RecOrder, User};
use crate::error::{LedgerError, Result};
use crate::receivable::Receivable;
use sled::IVec;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    User,
    RecOrder,
    Receivable,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Record {
    #[n(0)]
    pub version: u64,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub body: Vec<u8>,
}

pub trait Entity: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const KIND: Kind;
    fn key(&self) -> &str;
}

/// The ledger substrate: versioned reads, prefix scans and atomic commits.
pub trait Store: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Record>>;
    fn scan<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = Result<(String, Record)>> + 'a>;
    /// Applies `writes` only if every key in `reads` is still at the version observed.
    /// A version of zero means the key was absent.
    fn commit(&self, reads: &BTreeMap<String, u64>, writes: &BTreeMap<String, Vec<u8>>)
    -> Result<()>;
}

impl Kind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Kind::User => "user/",
            Kind::RecOrder => "order/",
            Kind::Receivable => "rec/",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Entity for User {
    const KIND: Kind = Kind::User;
    fn key(&self) -> &str {
        &self.id
    }
}

impl Entity for RecOrder {
    const KIND: Kind = Kind::RecOrder;
    fn key(&self) -> &str {
        &self.order_no
    }
}

impl Entity for Receivable {
    const KIND: Kind = Kind::Receivable;
    fn key(&self) -> &str {
        &self.receivable_no
    }
}

pub fn storage_key(kind: Kind, key: &str) -> String {
    format!("{}{}", kind.prefix(), key)
}

fn decode_record(bytes: &[u8]) -> Result<Record> {
    Ok(minicbor::decode(bytes)?)
}

fn decode_body<E: Entity>(body: &[u8]) -> Result<E> {
    Ok(minicbor::decode(body)?)
}

/// Latest committed value of an entity, outside of any session.
pub fn load<E: Entity>(store: &dyn Store, key: &str) -> Result<Option<E>> {
    store
        .read(&storage_key(E::KIND, key))?
        .map(|record| decode_body(&record.body))
        .transpose()
}

/// Lazily decodes every committed entity of one kind in store order.
pub fn iter_all<'a, E: Entity + 'a>(store: &'a dyn Store) -> impl Iterator<Item = Result<E>> + 'a {
    store
        .scan(E::KIND.prefix())
        .map(|item| item.and_then(|(_, record)| decode_body(&record.body)))
}

pub struct SledStore {
    instance: Arc<sled::Db>,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(sled::open(path)?)))
    }
}

fn version_of(value: Option<IVec>) -> std::result::Result<u64, ConflictableTransactionError<LedgerError>> {
    match value {
        Some(bytes) => decode_record(&bytes)
            .map(|record| record.version)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(0),
    }
}

impl Store for SledStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        self.instance
            .get(key.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    fn scan<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = Result<(String, Record)>> + 'a> {
        Box::new(self.instance.scan_prefix(prefix.as_bytes()).map(|item| -> Result<(String, Record)> {
            let (key, value) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            Ok((key, decode_record(&value)?))
        }))
    }

    fn commit(
        &self,
        reads: &BTreeMap<String, u64>,
        writes: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let outcome = self.instance.transaction(
            |tx: &TransactionalTree| -> std::result::Result<(), ConflictableTransactionError<LedgerError>> {
                for (key, &expected) in reads {
                    let found = version_of(tx.get(key.as_bytes())?)?;
                    if found != expected {
                        return Err(ConflictableTransactionError::Abort(LedgerError::Conflict {
                            key: key.clone(),
                            expected,
                            found,
                        }));
                    }
                }
                for (key, body) in writes {
                    let version = version_of(tx.get(key.as_bytes())?)? + 1;
                    let record = Record {
                        version,
                        body: body.clone(),
                    };
                    let bytes = minicbor::to_vec(&record)
                        .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
                    tx.insert(key.as_bytes(), bytes)?;
                }
                Ok(())
            },
        );

        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }
}

/// In-process store with the same commit semantics as [`SledStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Record>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.records().get(key).cloned())
    }

    fn scan<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = Result<(String, Record)>> + 'a> {
        let matched: Vec<Result<(String, Record)>> = self
            .records()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, record)| Ok((key.clone(), record.clone())))
            .collect();
        Box::new(matched.into_iter())
    }

    fn commit(
        &self,
        reads: &BTreeMap<String, u64>,
        writes: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let mut records = self.records();
        for (key, &expected) in reads {
            let found = records.get(key).map_or(0, |record| record.version);
            if found != expected {
                return Err(LedgerError::Conflict {
                    key: key.clone(),
                    expected,
                    found,
                });
            }
        }
        for (key, body) in writes {
            let version = records.get(key).map_or(0, |record| record.version) + 1;
            records.insert(
                key.clone(),
                Record {
                    version,
                    body: body.clone(),
                },
            );
        }
        Ok(())
    }
}

/// Read set and buffered write set of one transaction.
pub struct Session<'s> {
    store: &'s dyn Store,
    reads: BTreeMap<String, u64>,
    writes: BTreeMap<String, Vec<u8>>,
}

impl<'s> Session<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    // reads see this session's own writes first, then the committed store
    fn observe(&mut self, key: String) -> Result<Option<Vec<u8>>> {
        if let Some(body) = self.writes.get(&key) {
            return Ok(Some(body.clone()));
        }
        let record = self.store.read(&key)?;
        let version = record.as_ref().map_or(0, |record| record.version);
        self.reads.entry(key).or_insert(version);
        Ok(record.map(|record| record.body))
    }

    pub fn find<E: Entity>(&mut self, key: &str) -> Result<Option<E>> {
        self.observe(storage_key(E::KIND, key))?
            .map(|body| decode_body(&body))
            .transpose()
    }

    pub fn get<E: Entity>(&mut self, key: &str) -> Result<E> {
        self.find(key)?
            .ok_or_else(|| LedgerError::not_found(E::KIND, key))
    }

    pub fn exists<E: Entity>(&mut self, key: &str) -> Result<bool> {
        Ok(self.observe(storage_key(E::KIND, key))?.is_some())
    }

    /// Buffers the full value of `entity`, replacing any prior version on commit.
    pub fn put<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let body = minicbor::to_vec(entity)?;
        self.writes.insert(storage_key(E::KIND, entity.key()), body);
        Ok(())
    }

    /// Every entity of one kind as this session sees it. Each scanned key joins
    /// the read set, so a concurrent update to any of them fails the commit.
    /// Keys created by others after the scan are not detected.
    pub fn list_all<E: Entity>(&mut self) -> Result<Vec<E>> {
        let prefix = E::KIND.prefix();
        let store = self.store;
        let mut bodies = BTreeMap::new();
        for item in store.scan(prefix) {
            let (key, record) = item?;
            self.reads.entry(key.clone()).or_insert(record.version);
            bodies.insert(key, record.body);
        }
        for (key, body) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            bodies.insert(key.clone(), body.clone());
        }
        bodies.values().map(|body| decode_body(body)).collect()
    }

    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        debug!(
            reads = self.reads.len(),
            writes = self.writes.len(),
            "committing session"
        );
        self.store.commit(&self.reads, &self.writes).inspect_err(|e| {
            if e.is_retryable() {
                warn!(error = %e, "session lost an optimistic version check");
            }
        })
    }
}
