//! Service layer API for barter negotiation
use super::barter::{
    Barter, BarterStatus, CounterOffer, ExchangeLocation, OfferLine, OpenBarter, Party,
    PartyReview,
};
use super::clock::{Clock, SystemClock};
use super::config::BarterConfig;
use super::directory::{Product, ProductDirectory, Vendor, VendorDirectory};
use super::error::{BarterError, StoreError, ValidationError};
use super::notify::{BarterEvent, Notifier};
use super::store::{BarterStore, Perspective};
use super::types::{BarterId, ProductRef, TimeStamp, VendorHandle, VendorId};
use super::utils;
use super::value::Amount;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A new offer as submitted by the proposing vendor
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    pub target_product: ProductRef,
    pub target_quantity: u32,
    pub offered_items: Vec<OfferLine>,
    pub proposal_message: String,
    pub quality_notes: String,
    pub condition_requirements: String,
}

#[derive(Debug, Clone, Default)]
pub struct Acceptance {
    pub response_message: String,
    /// Only the sub-fields that are set are applied
    pub exchange_location: Option<ExchangeLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct CounterProposal {
    pub items: Vec<OfferLine>,
    pub cash_adjustment: Amount,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BarterQuery {
    pub perspective: Perspective,
    pub status: Option<BarterStatus>,
    /// 1-based, zero is treated as the first page
    pub page: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}

pub struct BarterService {
    store: BarterStore,
    products: Arc<dyn ProductDirectory>,
    vendors: Arc<dyn VendorDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: BarterConfig,
}

impl BarterService {
    pub fn new(
        instance: Arc<sled::Db>,
        products: Arc<dyn ProductDirectory>,
        vendors: Arc<dyn VendorDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, BarterError> {
        Ok(Self {
            store: BarterStore::open(instance)?,
            products,
            vendors,
            notifier,
            clock: Arc::new(SystemClock),
            config: BarterConfig::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: BarterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &BarterStore {
        &self.store
    }

    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::from(self.clock.now())
    }

    /// Resolve the calling account to its vendor profile
    fn vendor(&self, caller: &VendorId) -> Result<Vendor, BarterError> {
        self.vendors
            .find_by_id(caller)
            .map_err(BarterError::Directory)?
            .ok_or_else(|| BarterError::NotFound("vendor profile not found".into()))
    }

    /// Load a live barter that `handle` takes part in, as `party` when given.
    /// Anything else is reported as not found so callers learn nothing about
    /// barters they are not part of.
    fn load_as(
        &self,
        id: &BarterId,
        handle: &VendorHandle,
        party: Option<Party>,
        verb: &str,
    ) -> Result<Barter, BarterError> {
        let barter = self.store.get(id)?.filter(|barter| match party {
            Some(party) => barter.party_of(handle) == Some(party),
            None => barter.party_of(handle).is_some(),
        });
        barter.ok_or_else(|| {
            BarterError::NotFound(format!("barter offer not found or cannot be {verb}"))
        })
    }

    /// Best effort delivery. A failed notification never undoes a transition.
    fn notify(&self, event: BarterEvent, barter: &Barter, sender: &VendorHandle) {
        if let Err(err) = self.notifier.send(event, barter, sender) {
            warn!(
                barter = %barter.barter_number,
                event = event.as_str(),
                error = %err,
                "failed to deliver barter notification"
            );
        }
    }

    /// Check that every line names a product owned by `owner`
    fn ensure_owned(
        &self,
        lines: &[OfferLine],
        owner: &VendorHandle,
    ) -> Result<Vec<Product>, BarterError> {
        let ids: Vec<ProductRef> = lines.iter().map(|line| line.product.clone()).collect();
        let owned = self
            .products
            .find_many(&ids, Some(owner))
            .map_err(BarterError::Directory)?;
        // a repeated id matches one product, so it fails here too
        if owned.len() != ids.len() {
            return Err(ValidationError::NotOwned.into());
        }
        Ok(owned)
    }

    /// Open a new barter offer against another vendor's product
    pub fn propose(&self, caller: &VendorId, proposal: Proposal) -> Result<Barter, BarterError> {
        let proposer = self.vendor(caller)?;

        // Look up what is being asked for and who owns it
        let target = self
            .products
            .find_by_id(&proposal.target_product)
            .map_err(BarterError::Directory)?
            .ok_or_else(|| BarterError::NotFound("target product not found".into()))?;
        if !target.barter_available {
            return Err(ValidationError::BarterUnavailable.into());
        }
        let owner = self
            .vendors
            .find_by_handle(&target.owner)
            .map_err(BarterError::Directory)?
            .ok_or_else(|| BarterError::NotFound("target vendor not found".into()))?;
        if owner.handle == proposer.handle {
            return Err(ValidationError::SelfBarter.into());
        }

        // Shape of the offer, before touching the directory again
        if proposal.offered_items.is_empty() {
            return Err(ValidationError::EmptyOffer.into());
        }
        for line in &proposal.offered_items {
            if line.quantity == 0 {
                return Err(ValidationError::ZeroQuantity(line.product.clone()).into());
            }
            if line.unit_price.is_negative() {
                return Err(ValidationError::NegativePrice(line.product.clone()).into());
            }
        }
        if proposal.target_quantity == 0 {
            return Err(ValidationError::ZeroTargetQuantity.into());
        }

        // Offered goods must belong to the proposer and be in stock
        let owned = self.ensure_owned(&proposal.offered_items, &proposer.handle)?;
        for line in &proposal.offered_items {
            if let Some(product) = owned.iter().find(|product| product.id == line.product) {
                if product.stock < line.quantity {
                    return Err(ValidationError::InsufficientStock {
                        product: product.id.clone(),
                        available: product.stock,
                        requested: line.quantity,
                    }
                    .into());
                }
            }
        }

        let now = self.clock.now();
        let barter = Barter::open(OpenBarter {
            id: BarterId::new(utils::new_uuid_to_bech32("barter").map_err(BarterError::Internal)?),
            barter_number: utils::barter_number(now, &mut rand::thread_rng()),
            proposing_vendor_id: proposer.id,
            proposing_vendor_handle: proposer.handle,
            target_vendor_id: owner.id,
            target_vendor_handle: owner.handle,
            target_product: target.id.clone(),
            target_quantity: proposal.target_quantity,
            target_unit_price: target.barter_price(),
            offered: proposal.offered_items,
            proposal_message: proposal.proposal_message,
            quality_notes: proposal.quality_notes,
            condition_requirements: proposal.condition_requirements,
            proposed_at: TimeStamp::from(now),
            ttl: self.config.offer_ttl,
        })?;

        // Unique barter number is claimed in the same write
        self.store.insert(&barter)?;
        info!(
            barter = %barter.barter_number,
            proposer = %barter.proposing_vendor_handle,
            target = %barter.target_vendor_handle,
            value_difference = %barter.value_difference,
            "barter offer proposed"
        );

        self.notify(BarterEvent::NewOffer, &barter, &barter.proposing_vendor_handle);
        Ok(barter)
    }

    /// A barter as seen by one of its two parties
    pub fn get(&self, caller: &VendorId, id: &BarterId) -> Result<Barter, BarterError> {
        let vendor = self.vendor(caller)?;
        self.store
            .get(id)?
            .filter(|barter| barter.party_of(&vendor.handle).is_some())
            .ok_or_else(|| BarterError::NotFound("barter offer not found".into()))
    }

    /// Barters the caller takes part in, newest first
    pub fn list(&self, caller: &VendorId, query: BarterQuery) -> Result<Page<Barter>, BarterError> {
        let vendor = self.vendor(caller)?;
        let limit = query
            .limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let page = query.page.max(1);

        let all = self.store.for_vendor(&vendor.handle, query.perspective, query.status)?;
        let total = all.len();
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(Page {
            items,
            total,
            page,
            limit,
            pages: total.div_ceil(limit),
        })
    }

    /// Target vendor accepts a pending offer
    pub fn accept(
        &self,
        caller: &VendorId,
        id: &BarterId,
        acceptance: Acceptance,
    ) -> Result<Barter, BarterError> {
        let vendor = self.vendor(caller)?;
        let mut barter = self.load_as(id, &vendor.handle, Some(Party::Target), "accepted")?;
        let now = self.now();

        // A stale offer is closed on the spot and the accept still fails
        if barter.is_expired(&now) {
            barter
                .expire()
                .map_err(|err| BarterError::transition(&barter.barter_number, "expired", err))?;
            self.store.update(&mut barter)?;
            info!(barter = %barter.barter_number, "barter offer expired on accept");
            return Err(BarterError::InvalidState {
                barter_number: barter.barter_number,
                status: BarterStatus::Expired,
                action: "accepted",
            });
        }

        barter
            .accept(acceptance.response_message, acceptance.exchange_location, now)
            .map_err(|err| BarterError::transition(&barter.barter_number, "accepted", err))?;
        self.store.update(&mut barter)?;
        info!(barter = %barter.barter_number, vendor = %vendor.handle, "barter offer accepted");

        self.notify(BarterEvent::Accepted, &barter, &vendor.handle);
        Ok(barter)
    }

    /// Target vendor turns down a pending offer
    pub fn reject(
        &self,
        caller: &VendorId,
        id: &BarterId,
        response_message: String,
    ) -> Result<Barter, BarterError> {
        let vendor = self.vendor(caller)?;
        let mut barter = self.load_as(id, &vendor.handle, Some(Party::Target), "rejected")?;

        barter
            .reject(response_message, self.now())
            .map_err(|err| BarterError::transition(&barter.barter_number, "rejected", err))?;
        self.store.update(&mut barter)?;
        info!(barter = %barter.barter_number, vendor = %vendor.handle, "barter offer rejected");

        self.notify(BarterEvent::Rejected, &barter, &vendor.handle);
        Ok(barter)
    }

    /// Target vendor answers a pending offer with different terms
    pub fn counter(
        &self,
        caller: &VendorId,
        id: &BarterId,
        proposal: CounterProposal,
    ) -> Result<Barter, BarterError> {
        let vendor = self.vendor(caller)?;
        let mut barter = self.load_as(id, &vendor.handle, Some(Party::Target), "countered")?;
        if barter.status != BarterStatus::Pending {
            return Err(BarterError::InvalidState {
                barter_number: barter.barter_number,
                status: barter.status,
                action: "countered",
            });
        }

        // Counter lines are priced like an offer, but from the target's stock
        let now = self.now();
        let offer = CounterOffer::new(
            &proposal.items,
            proposal.cash_adjustment,
            proposal.message,
            now.clone(),
        )?;
        self.ensure_owned(&proposal.items, &vendor.handle)?;

        barter
            .counter(offer, now)
            .map_err(|err| BarterError::transition(&barter.barter_number, "countered", err))?;
        self.store.update(&mut barter)?;
        info!(barter = %barter.barter_number, vendor = %vendor.handle, "barter counter offer made");

        self.notify(BarterEvent::CounterOffer, &barter, &vendor.handle);
        Ok(barter)
    }

    /// Either party marks an accepted barter done, optionally reviewing the
    /// other side
    pub fn complete(
        &self,
        caller: &VendorId,
        id: &BarterId,
        review: Option<PartyReview>,
    ) -> Result<Barter, BarterError> {
        let vendor = self.vendor(caller)?;
        let mut barter = self.load_as(id, &vendor.handle, None, "completed")?;
        let party = barter.party_of(&vendor.handle).ok_or_else(|| {
            BarterError::NotFound("barter offer not found or cannot be completed".into())
        })?;

        barter
            .complete(party, review, self.now())
            .map_err(|err| BarterError::transition(&barter.barter_number, "completed", err))?;
        self.store.update(&mut barter)?;
        info!(barter = %barter.barter_number, vendor = %vendor.handle, "barter completed");

        Ok(barter)
    }

    /// Close every pending offer past its deadline and tell the proposers.
    /// Barters changed by someone else mid-sweep are skipped.
    pub fn sweep_expired(&self) -> Result<Vec<Barter>, BarterError> {
        let now = self.now();
        let mut expired = Vec::new();

        for mut barter in self.store.expired_pending(&now)? {
            if barter.expire().is_err() {
                continue;
            }
            match self.store.update(&mut barter) {
                Ok(()) => {}
                Err(err @ StoreError::VersionConflict { .. }) => {
                    debug!(
                        barter = %barter.barter_number,
                        error = %err,
                        "skipping barter changed during sweep"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            info!(barter = %barter.barter_number, "barter offer expired");
            self.notify(BarterEvent::Expired, &barter, &barter.target_vendor_handle);
            expired.push(barter);
        }

        Ok(expired)
    }

    /// Hide a settled barter from both parties
    pub fn archive(&self, caller: &VendorId, id: &BarterId) -> Result<(), BarterError> {
        let vendor = self.vendor(caller)?;
        let mut barter = self.load_as(id, &vendor.handle, None, "archived")?;
        if matches!(barter.status, BarterStatus::Pending | BarterStatus::Accepted) {
            return Err(BarterError::InvalidState {
                barter_number: barter.barter_number,
                status: barter.status,
                action: "archived",
            });
        }

        self.store.soft_delete(&mut barter)?;
        info!(barter = %barter.barter_number, vendor = %vendor.handle, "barter archived");
        Ok(())
    }

    /// The caller's products that can currently be put into an offer
    pub fn barterable_products(&self, caller: &VendorId) -> Result<Vec<Product>, BarterError> {
        let vendor = self.vendor(caller)?;
        let products = self
            .products
            .products_of(&vendor.handle)
            .map_err(BarterError::Directory)?;
        Ok(products
            .into_iter()
            .filter(|product| product.approved && product.stock > 0)
            .collect())
    }
}
