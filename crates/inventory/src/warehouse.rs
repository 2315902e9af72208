use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gemledger_core::{DomainError, DomainResult, Entity, WarehouseId};

/// A physical or logical stock location.
///
/// Identity is immutable; `name` and `is_default` are metadata and may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn new(
        id: WarehouseId,
        name: impl Into<String>,
        is_default: bool,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            is_default,
            created_at,
        })
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        self.name = validate_name(name.into())?;
        Ok(())
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_name(name: String) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("warehouse name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_trimmed_and_required() {
        let w = Warehouse::new(WarehouseId::new(), "  Vault A ", true, Utc::now()).unwrap();
        assert_eq!(w.name, "Vault A");

        let err = Warehouse::new(WarehouseId::new(), "   ", false, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rename_keeps_identity() {
        let mut w = Warehouse::new(WarehouseId::new(), "Vault A", false, Utc::now()).unwrap();
        let id = w.id;
        w.rename("Vault B").unwrap();
        assert_eq!(w.id, id);
        assert_eq!(w.name, "Vault B");
        assert!(w.rename("").is_err());
        assert_eq!(w.name, "Vault B");
    }
}
