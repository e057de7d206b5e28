//! Sled persistence for barters
//!
//! Records are CBOR encoded and keyed by their storage id. A second tree maps
//! barter numbers to ids so a duplicate number is refused at insert time.
//! Writes after creation are compare-and-swap on the stored bytes and carry a
//! version check, so two callers racing on the same barter cannot both win.
//!
//! Soft-deleted barters are hidden by every lookup here except [`BarterStore::get_raw`].
use super::barter::{Barter, BarterStatus};
use super::error::StoreError;
use super::types::{BarterId, TimeStamp, VendorHandle};
use chrono::Utc;
use sled::transaction::{TransactionError, abort};
use sled::Transactional;
use std::sync::Arc;

/// Which side of the barters a vendor is looking at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Perspective {
    /// Proposed by or addressed to the vendor
    #[default]
    All,
    /// Proposed by the vendor
    Sent,
    /// Addressed to the vendor
    Received,
}

#[derive(Debug, Clone)]
pub struct BarterStore {
    barters: sled::Tree,
    numbers: sled::Tree,
}

impl BarterStore {
    pub fn open(db: Arc<sled::Db>) -> Result<Self, StoreError> {
        let barters = db.open_tree("barters")?;
        let numbers = db.open_tree("barter_numbers")?;
        Ok(Self { barters, numbers })
    }

    /// Store a new barter, claiming its barter number
    pub fn insert(&self, barter: &Barter) -> Result<(), StoreError> {
        let bytes = minicbor::to_vec(barter)?;
        let number = barter.barter_number.as_bytes();
        let id = barter.id.as_bytes();

        let result = (&self.barters, &self.numbers).transaction(|(barters, numbers)| {
            if numbers.get(number)?.is_some() {
                return abort(StoreError::DuplicateBarterNumber(barter.barter_number.clone()));
            }
            numbers.insert(number, id)?;
            barters.insert(id, bytes.clone())?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    /// Fetch a barter regardless of its soft-delete flag
    pub fn get_raw(&self, id: &BarterId) -> Result<Option<Barter>, StoreError> {
        match self.barters.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: &BarterId) -> Result<Option<Barter>, StoreError> {
        Ok(self.get_raw(id)?.filter(|barter| !barter.is_deleted))
    }

    pub fn find_by_number(&self, number: &str) -> Result<Option<Barter>, StoreError> {
        match self.numbers.get(number.as_bytes())? {
            Some(id) => {
                let id = BarterId::new(String::from_utf8_lossy(id.as_ref()).into_owned());
                self.get(&id)
            }
            None => Ok(None),
        }
    }

    /// Write back a barter loaded earlier. Fails with
    /// [`StoreError::VersionConflict`] if anyone else wrote it in between. On
    /// success `barter.version` is bumped to the stored version.
    pub fn update(&self, barter: &mut Barter) -> Result<(), StoreError> {
        let key = barter.id.as_bytes();
        let current = self
            .barters
            .get(key)?
            .ok_or_else(|| StoreError::Missing(barter.id.clone()))?;
        let stored: Barter = minicbor::decode(current.as_ref())?;
        if stored.version != barter.version {
            return Err(StoreError::VersionConflict {
                id: barter.id.clone(),
                expected: barter.version,
                found: stored.version,
            });
        }

        let mut next = barter.clone();
        next.version = barter.version + 1;
        let bytes = minicbor::to_vec(&next)?;

        match self.barters.compare_and_swap(key, Some(current), Some(bytes))? {
            Ok(()) => {
                barter.version = next.version;
                Ok(())
            }
            Err(_) => Err(StoreError::VersionConflict {
                id: barter.id.clone(),
                expected: barter.version,
                found: self
                    .get_raw(&barter.id)?
                    .map(|latest| latest.version)
                    .unwrap_or_default(),
            }),
        }
    }

    /// Every barter that passes `keep`, skipping soft-deleted ones
    fn scan<F>(&self, mut keep: F) -> Result<Vec<Barter>, StoreError>
    where
        F: FnMut(&Barter) -> bool,
    {
        let mut found = Vec::new();
        for entry in self.barters.iter() {
            let (_, bytes) = entry?;
            let barter: Barter = minicbor::decode(bytes.as_ref())?;
            if !barter.is_deleted && keep(&barter) {
                found.push(barter);
            }
        }
        Ok(found)
    }

    /// Barters `vendor` takes part in, newest first
    pub fn for_vendor(
        &self,
        vendor: &VendorHandle,
        perspective: Perspective,
        status: Option<BarterStatus>,
    ) -> Result<Vec<Barter>, StoreError> {
        let mut found = self.scan(|barter| {
            let side = match perspective {
                Perspective::All => {
                    &barter.proposing_vendor_handle == vendor
                        || &barter.target_vendor_handle == vendor
                }
                Perspective::Sent => &barter.proposing_vendor_handle == vendor,
                Perspective::Received => &barter.target_vendor_handle == vendor,
            };
            side && status.is_none_or(|status| barter.status == status)
        })?;
        found.sort_by(|a, b| {
            b.proposed_at
                .cmp(&a.proposed_at)
                .then_with(|| b.barter_number.cmp(&a.barter_number))
        });
        Ok(found)
    }

    /// Pending barters whose deadline is before `now`
    pub fn expired_pending(&self, now: &TimeStamp<Utc>) -> Result<Vec<Barter>, StoreError> {
        self.scan(|barter| barter.is_expired(now))
    }

    /// Hide a barter from every regular lookup. Returns false if it was
    /// already hidden.
    pub fn soft_delete(&self, barter: &mut Barter) -> Result<bool, StoreError> {
        if barter.is_deleted {
            return Ok(false);
        }
        barter.is_deleted = true;
        if let Err(err) = self.update(barter) {
            barter.is_deleted = false;
            return Err(err);
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.barters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barters.is_empty()
    }
}
