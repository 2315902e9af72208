//! Warehouse registry.
//!
//! Exactly one warehouse is the default once any exist. Registry writes are
//! serialized by a local mutex; they touch no stock, so they never take
//! ledger keys.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;

use gemledger_core::{DomainError, DomainResult, WarehouseId};
use gemledger_inventory::Warehouse;

use crate::ledger_store::{ChangeSet, LedgerStore};

#[derive(Debug, Clone)]
pub struct WarehouseRegistry<S> {
    store: S,
    writes: Arc<Mutex<()>>,
}

impl<S: LedgerStore> WarehouseRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    fn save(&self, warehouses: Vec<Warehouse>) -> DomainResult<()> {
        self.store.commit(ChangeSet {
            warehouses,
            ..ChangeSet::default()
        })?;
        Ok(())
    }

    /// Create a warehouse. The first one ever created becomes the default
    /// regardless of `is_default`.
    pub fn create(
        &self,
        name: &str,
        is_default: bool,
        at: DateTime<Utc>,
    ) -> DomainResult<Warehouse> {
        let _guard = self.writes.lock().unwrap_or_else(|p| p.into_inner());

        let existing = self.store.warehouses()?;
        let is_default = is_default || existing.is_empty();
        let warehouse = Warehouse::new(WarehouseId::new(), name, is_default, at)?;

        let mut changed = vec![warehouse.clone()];
        if is_default {
            changed.extend(existing.into_iter().filter(|w| w.is_default).map(|mut w| {
                w.is_default = false;
                w
            }));
        }
        self.save(changed)?;

        info!(warehouse = %warehouse.id, name = %warehouse.name, is_default, "warehouse created");
        Ok(warehouse)
    }

    pub fn rename(&self, id: WarehouseId, name: &str) -> DomainResult<Warehouse> {
        let _guard = self.writes.lock().unwrap_or_else(|p| p.into_inner());

        let mut warehouse = self.get(id)?;
        warehouse.rename(name)?;
        self.save(vec![warehouse.clone()])?;
        Ok(warehouse)
    }

    /// Make `id` the only default warehouse.
    pub fn set_default(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        let _guard = self.writes.lock().unwrap_or_else(|p| p.into_inner());

        let all = self.store.warehouses()?;
        if !all.iter().any(|w| w.id == id) {
            return Err(DomainError::not_found(format!("warehouse {id}")));
        }
        let changed = all
            .into_iter()
            .filter(|w| w.is_default != (w.id == id))
            .map(|mut w| {
                w.is_default = w.id == id;
                w
            })
            .collect();
        self.save(changed)?;

        info!(warehouse = %id, "default warehouse changed");
        self.get(id)
    }

    pub fn get(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        self.store
            .warehouse(id)?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))
    }

    /// All warehouses, ordered by name.
    pub fn list(&self) -> DomainResult<Vec<Warehouse>> {
        Ok(self.store.warehouses()?)
    }

    pub fn default_warehouse(&self) -> DomainResult<Option<Warehouse>> {
        Ok(self.store.warehouses()?.into_iter().find(|w| w.is_default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_store::InMemoryLedgerStore;

    fn registry() -> WarehouseRegistry<InMemoryLedgerStore> {
        WarehouseRegistry::new(InMemoryLedgerStore::new())
    }

    fn defaults(registry: &WarehouseRegistry<InMemoryLedgerStore>) -> Vec<WarehouseId> {
        registry
            .list()
            .unwrap()
            .into_iter()
            .filter(|w| w.is_default)
            .map(|w| w.id)
            .collect()
    }

    #[test]
    fn first_warehouse_becomes_default() {
        let registry = registry();
        let main = registry.create("Main vault", false, Utc::now()).unwrap();
        assert!(main.is_default);

        let annex = registry.create("Annex", false, Utc::now()).unwrap();
        assert!(!annex.is_default);
        assert_eq!(defaults(&registry), vec![main.id]);
    }

    #[test]
    fn only_one_default_at_a_time() {
        let registry = registry();
        let main = registry.create("Main vault", true, Utc::now()).unwrap();
        let annex = registry.create("Annex", true, Utc::now()).unwrap();
        assert_eq!(defaults(&registry), vec![annex.id]);

        let main = registry.set_default(main.id).unwrap();
        assert!(main.is_default);
        assert_eq!(defaults(&registry), vec![main.id]);
        assert_eq!(registry.default_warehouse().unwrap().map(|w| w.id), Some(main.id));
    }

    #[test]
    fn rename_requires_a_name_and_an_existing_warehouse() {
        let registry = registry();
        let main = registry.create("Main", false, Utc::now()).unwrap();

        assert_eq!(registry.rename(main.id, " Safe 1 ").unwrap().name, "Safe 1");
        assert!(matches!(registry.rename(main.id, "  "), Err(DomainError::Validation(_))));
        assert!(matches!(
            registry.rename(WarehouseId::new(), "X"),
            Err(DomainError::NotFound(_))
        ));
    }
}
