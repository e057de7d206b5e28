//! Read-only views of the product catalog and vendor accounts
//!
//! Both live outside this crate. The services only need the narrow lookups
//! below; [`MemoryDirectory`] implements them over in-process maps for
//! embedding and tests.
use super::types::{ProductRef, VendorHandle, VendorId};
use super::value::Amount;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductRef,
    pub name: String,
    pub owner: VendorHandle,
    pub barter_available: bool,
    pub unit_price: Amount,
    pub offer_price: Option<Amount>,
    pub stock: u32,
    pub approved: bool,
}

impl Product {
    /// The price a barter values this product at: the offer price when one
    /// is set, the regular unit price otherwise
    pub fn barter_price(&self) -> Amount {
        self.offer_price
            .filter(|price| !price.is_zero())
            .unwrap_or(self.unit_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vendor {
    pub id: VendorId,
    pub handle: VendorHandle,
    pub display_name: String,
}

pub trait ProductDirectory: Send + Sync {
    fn find_by_id(&self, id: &ProductRef) -> anyhow::Result<Option<Product>>;

    /// Products among `ids`, restricted to `owner` when given. Unknown ids and
    /// products owned by someone else are left out, never reported.
    fn find_many(
        &self,
        ids: &[ProductRef],
        owner: Option<&VendorHandle>,
    ) -> anyhow::Result<Vec<Product>>;

    fn products_of(&self, owner: &VendorHandle) -> anyhow::Result<Vec<Product>>;
}

pub trait VendorDirectory: Send + Sync {
    fn find_by_id(&self, id: &VendorId) -> anyhow::Result<Option<Vendor>>;
    fn find_by_handle(&self, handle: &VendorHandle) -> anyhow::Result<Option<Vendor>>;
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    products: RwLock<HashMap<ProductRef, Product>>,
    vendors: RwLock<HashMap<VendorId, Vendor>>,
}

fn poisoned(what: &str) -> anyhow::Error {
    anyhow::anyhow!("{what} directory lock poisoned")
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_vendor(&self, vendor: Vendor) -> anyhow::Result<()> {
        self.vendors
            .write()
            .map_err(|_| poisoned("vendor"))?
            .insert(vendor.id.clone(), vendor);
        Ok(())
    }

    pub fn upsert_product(&self, product: Product) -> anyhow::Result<()> {
        self.products
            .write()
            .map_err(|_| poisoned("product"))?
            .insert(product.id.clone(), product);
        Ok(())
    }

    /// Overwrite the stock level of a product. Returns false if it is unknown.
    pub fn set_stock(&self, id: &ProductRef, stock: u32) -> anyhow::Result<bool> {
        let mut products = self.products.write().map_err(|_| poisoned("product"))?;
        Ok(match products.get_mut(id) {
            Some(product) => {
                product.stock = stock;
                true
            }
            None => false,
        })
    }
}

impl ProductDirectory for MemoryDirectory {
    fn find_by_id(&self, id: &ProductRef) -> anyhow::Result<Option<Product>> {
        let products = self.products.read().map_err(|_| poisoned("product"))?;
        Ok(products.get(id).cloned())
    }

    fn find_many(
        &self,
        ids: &[ProductRef],
        owner: Option<&VendorHandle>,
    ) -> anyhow::Result<Vec<Product>> {
        let products = self.products.read().map_err(|_| poisoned("product"))?;
        let mut found: Vec<Product> = products
            .values()
            .filter(|product| ids.contains(&product.id))
            .filter(|product| owner.is_none_or(|owner| &product.owner == owner))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn products_of(&self, owner: &VendorHandle) -> anyhow::Result<Vec<Product>> {
        let products = self.products.read().map_err(|_| poisoned("product"))?;
        let mut owned: Vec<Product> = products
            .values()
            .filter(|product| &product.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(owned)
    }
}

impl VendorDirectory for MemoryDirectory {
    fn find_by_id(&self, id: &VendorId) -> anyhow::Result<Option<Vendor>> {
        let vendors = self.vendors.read().map_err(|_| poisoned("vendor"))?;
        Ok(vendors.get(id).cloned())
    }

    fn find_by_handle(&self, handle: &VendorHandle) -> anyhow::Result<Option<Vendor>> {
        let vendors = self.vendors.read().map_err(|_| poisoned("vendor"))?;
        Ok(vendors.values().find(|vendor| &vendor.handle == handle).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, owner: &str) -> Product {
        Product {
            id: ProductRef::new(id),
            name: id.to_uppercase(),
            owner: VendorHandle::new(owner),
            barter_available: true,
            unit_price: Amount::whole(10),
            offer_price: None,
            stock: 5,
            approved: true,
        }
    }

    #[test]
    fn barter_price_prefers_offer_price() {
        let mut p = product("rice", "alpha");
        assert_eq!(p.barter_price(), Amount::whole(10));

        p.offer_price = Some(Amount::whole(8));
        assert_eq!(p.barter_price(), Amount::whole(8));

        p.offer_price = Some(Amount::ZERO);
        assert_eq!(p.barter_price(), Amount::whole(10));
    }

    #[test]
    fn find_many_filters_by_owner() {
        let dir = MemoryDirectory::new();
        dir.upsert_product(product("rice", "alpha")).unwrap();
        dir.upsert_product(product("mango", "beta")).unwrap();

        let ids = [ProductRef::new("rice"), ProductRef::new("mango"), ProductRef::new("ghost")];
        assert_eq!(dir.find_many(&ids, None).unwrap().len(), 2);

        let alpha = VendorHandle::new("alpha");
        let owned = dir.find_many(&ids, Some(&alpha)).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, ProductRef::new("rice"));
    }

    #[test]
    fn vendors_resolve_by_id_and_handle() {
        let dir = MemoryDirectory::new();
        dir.upsert_vendor(Vendor {
            id: VendorId::new("v-1"),
            handle: VendorHandle::new("alpha"),
            display_name: "Alpha Farm".into(),
        })
        .unwrap();

        assert!(VendorDirectory::find_by_id(&dir, &VendorId::new("v-1")).unwrap().is_some());
        assert!(dir.find_by_handle(&VendorHandle::new("alpha")).unwrap().is_some());
        assert!(dir.find_by_handle(&VendorHandle::new("beta")).unwrap().is_none());
    }
}
