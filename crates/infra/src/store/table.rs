use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use genflow_core::Entity;

use super::{Page, PageResult, StoreError};

/// Lock-guarded map of entities keyed by id.
///
/// Ids are UUIDv7, so key order is creation order and pages come out oldest first.
pub struct InMemoryTable<V: Entity> {
    entity: &'static str,
    rows: RwLock<BTreeMap<V::Id, V>>,
}

impl<V> InMemoryTable<V>
where
    V: Entity + Clone + Send + Sync,
    V::Id: Ord + Copy + core::fmt::Display + Send + Sync,
{
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<V::Id, V>>, StoreError> {
        self.rows
            .read()
            .map_err(|_| StoreError::Storage(format!("{} table lock poisoned", self.entity)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<V::Id, V>>, StoreError> {
        self.rows
            .write()
            .map_err(|_| StoreError::Storage(format!("{} table lock poisoned", self.entity)))
    }

    pub fn insert(&self, value: V) -> Result<(), StoreError> {
        let mut rows = self.write()?;
        let id = *value.id();
        if rows.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                entity: self.entity,
                id: id.to_string(),
            });
        }
        rows.insert(id, value);
        Ok(())
    }

    /// Insert unless an existing row matches `clash`, checked under the same lock.
    pub fn insert_unless(
        &self,
        value: V,
        clash: impl Fn(&V) -> bool,
        err: impl FnOnce() -> StoreError,
    ) -> Result<(), StoreError> {
        let mut rows = self.write()?;
        if rows.values().any(|v| clash(v)) {
            return Err(err());
        }
        let id = *value.id();
        if rows.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                entity: self.entity,
                id: id.to_string(),
            });
        }
        rows.insert(id, value);
        Ok(())
    }

    pub fn get(&self, id: &V::Id) -> Result<Option<V>, StoreError> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn find(&self, pred: impl Fn(&V) -> bool) -> Result<Option<V>, StoreError> {
        Ok(self.read()?.values().find(|v| pred(v)).cloned())
    }

    pub fn filter(&self, pred: impl Fn(&V) -> bool) -> Result<Vec<V>, StoreError> {
        Ok(self.read()?.values().filter(|v| pred(v)).cloned().collect())
    }

    /// Atomic read-modify-write of one row. `f` sees the stored value and may
    /// refuse the change by returning an error, leaving the row untouched.
    pub fn modify<R>(
        &self,
        id: &V::Id,
        f: impl FnOnce(&mut V) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut rows = self.write()?;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(self.entity, id))?;
        let mut draft = row.clone();
        let out = f(&mut draft)?;
        *row = draft;
        Ok(out)
    }

    pub fn page(&self, pred: impl Fn(&V) -> bool, page: Page) -> Result<PageResult<V>, StoreError> {
        let page = page.clamped();
        let rows = self.read()?;
        let matching: Vec<&V> = rows.values().filter(|v| pred(v)).collect();

        Ok(PageResult {
            total: matching.len(),
            items: matching
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect(),
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub fn len(&self) -> usize {
        self.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
