use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::store::{keys, KeyValueStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: String,
    pub name: String,
    pub credits: u64,
    pub price_usd: f64,
}

impl CreditPackage {
    pub fn new(id: &str, name: &str, credits: u64, price_usd: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            credits,
            price_usd,
        }
    }
}

pub fn default_packages() -> Vec<CreditPackage> {
    vec![
        CreditPackage::new("starter", "Starter", 100, 4.99),
        CreditPackage::new("pro", "Pro", 500, 19.99),
        CreditPackage::new("studio", "Studio", 1500, 49.99),
    ]
}

pub fn list_packages(store: &KeyValueStore) -> Vec<CreditPackage> {
    store.get(keys::CREDIT_PACKAGES, default_packages())
}

pub fn find_package(store: &KeyValueStore, id: &str) -> Option<CreditPackage> {
    let id = id.trim().to_ascii_lowercase();
    list_packages(store)
        .into_iter()
        .find(|package| package.id == id)
}

pub fn replace_packages(store: &mut KeyValueStore, packages: &[CreditPackage]) -> anyhow::Result<()> {
    validate_packages(packages)?;
    store.set(keys::CREDIT_PACKAGES, packages)
}

fn validate_packages(packages: &[CreditPackage]) -> anyhow::Result<()> {
    if packages.is_empty() {
        bail!("package catalog cannot be empty");
    }
    for (idx, package) in packages.iter().enumerate() {
        if package.id.trim().is_empty() || package.id != package.id.to_ascii_lowercase() {
            bail!("package #{idx} needs a lowercase id");
        }
        if package.credits == 0 {
            bail!("package '{}' grants no credits", package.id);
        }
        if !package.price_usd.is_finite() || package.price_usd < 0.0 {
            bail!("package '{}' has an invalid price", package.id);
        }
        if packages[..idx].iter().any(|other| other.id == package.id) {
            bail!("duplicate package id '{}'", package.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::KeyValueStore;

    use super::{find_package, list_packages, replace_packages, CreditPackage};

    #[test]
    fn defaults_served_until_replaced() -> anyhow::Result<()> {
        let mut store = KeyValueStore::in_memory();
        assert_eq!(list_packages(&store).len(), 3);
        assert_eq!(find_package(&store, " PRO ").map(|p| p.credits), Some(500));

        replace_packages(&mut store, &[CreditPackage::new("mini", "Mini", 25, 0.99)])?;
        assert!(find_package(&store, "pro").is_none());
        assert_eq!(find_package(&store, "mini").map(|p| p.credits), Some(25));
        Ok(())
    }

    #[test]
    fn rejects_invalid_catalogs() {
        let mut store = KeyValueStore::in_memory();
        assert!(replace_packages(&mut store, &[]).is_err());
        assert!(replace_packages(&mut store, &[CreditPackage::new("x", "X", 0, 1.0)]).is_err());
        assert!(replace_packages(
            &mut store,
            &[
                CreditPackage::new("x", "X", 1, 1.0),
                CreditPackage::new("x", "Y", 2, 2.0)
            ]
        )
        .is_err());
        assert_eq!(list_packages(&store).len(), 3);
    }
}
