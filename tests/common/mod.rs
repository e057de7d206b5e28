#![allow(dead_code)]

use barter_exchange::barter::{Barter, OfferLine, OpenBarter};
use barter_exchange::clock::ManualClock;
use barter_exchange::directory::{
    MemoryDirectory, Product, ProductDirectory, Vendor, VendorDirectory,
};
use barter_exchange::notify::{BarterEvent, Notifier, recipient_for};
use barter_exchange::service::BarterService;
use barter_exchange::types::{BarterId, ProductRef, TimeStamp, VendorHandle, VendorId};
use barter_exchange::value::Amount;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};

pub const ALPHA: &str = "v-alpha";
pub const BETA: &str = "v-beta";
pub const GAMMA: &str = "v-gamma";

pub fn alpha() -> VendorId {
    VendorId::new(ALPHA)
}
pub fn beta() -> VendorId {
    VendorId::new(BETA)
}
pub fn gamma() -> VendorId {
    VendorId::new(GAMMA)
}

pub fn handle(name: &str) -> VendorHandle {
    VendorHandle::new(name)
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// One delivered notification, as seen by the recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub event: BarterEvent,
    pub barter_number: String,
    pub recipient: VendorHandle,
    pub sender: VendorHandle,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
    pub fn last(&self) -> Option<Sent> {
        self.sent.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn send(
        &self,
        event: BarterEvent,
        barter: &Barter,
        triggered_by: &VendorHandle,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent {
            event,
            barter_number: barter.barter_number.clone(),
            recipient: recipient_for(barter, triggered_by).clone(),
            sender: triggered_by.clone(),
        });
        Ok(())
    }
}

/// Notifier whose transport is always down
#[derive(Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send(&self, event: BarterEvent, _: &Barter, _: &VendorHandle) -> anyhow::Result<()> {
        anyhow::bail!("notification transport unavailable for {}", event.as_str())
    }
}

pub fn product(id: &str, owner: &str, unit_price: i64, stock: u32) -> Product {
    Product {
        id: ProductRef::new(id),
        name: id.to_uppercase(),
        owner: handle(owner),
        barter_available: true,
        unit_price: Amount::whole(unit_price),
        offer_price: None,
        stock,
        approved: true,
    }
}

/// Three vendors and a small catalog:
///
/// - alpha-farm sells rice (25.00, 10 left), wheat (10.00, 3 left), beans (out of stock)
/// - beta-orchard sells mango (20.00), lime (5.00) and papaya (not for barter)
/// - gamma-dairy sells nothing
pub fn seeded_directory() -> Arc<MemoryDirectory> {
    let directory = MemoryDirectory::new();
    for (id, handle_name, name) in [
        (ALPHA, "alpha-farm", "Alpha Farm"),
        (BETA, "beta-orchard", "Beta Orchard"),
        (GAMMA, "gamma-dairy", "Gamma Dairy"),
    ] {
        directory
            .upsert_vendor(Vendor {
                id: VendorId::new(id),
                handle: handle(handle_name),
                display_name: name.into(),
            })
            .unwrap();
    }

    directory.upsert_product(product("rice", "alpha-farm", 25, 10)).unwrap();
    directory.upsert_product(product("wheat", "alpha-farm", 10, 3)).unwrap();
    directory.upsert_product(product("beans", "alpha-farm", 8, 0)).unwrap();
    directory.upsert_product(product("mango", "beta-orchard", 20, 50)).unwrap();
    directory.upsert_product(product("lime", "beta-orchard", 5, 100)).unwrap();

    let mut papaya = product("papaya", "beta-orchard", 12, 40);
    papaya.barter_available = false;
    directory.upsert_product(papaya).unwrap();

    Arc::new(directory)
}

pub fn temp_db(dir: &TempDir, name: &str) -> anyhow::Result<Arc<sled::Db>> {
    let db = sled::open(dir.path().join(name))?;
    db.clear()?;
    Ok(Arc::new(db))
}

pub struct Harness {
    // keeps the database directory alive for the test
    pub dir: TempDir,
    pub db: Arc<sled::Db>,
    pub directory: Arc<MemoryDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub service: BarterService,
}

pub fn harness() -> anyhow::Result<Harness> {
    let notifier = Arc::new(RecordingNotifier::default());
    harness_with(notifier.clone(), notifier)
}

/// Harness whose service sends through `sink`; `notifier` is still handed
/// back for inspection
pub fn harness_with(
    notifier: Arc<RecordingNotifier>,
    sink: Arc<dyn Notifier>,
) -> anyhow::Result<Harness> {
    let dir = tempdir()?;
    let db = temp_db(&dir, "barters.db")?;
    let directory = seeded_directory();
    let clock = Arc::new(ManualClock::new(start()));

    let products: Arc<dyn ProductDirectory> = directory.clone();
    let vendors: Arc<dyn VendorDirectory> = directory.clone();
    let service =
        BarterService::new(db.clone(), products, vendors, sink)?.with_clock(clock.clone());

    Ok(Harness {
        dir,
        db,
        directory,
        notifier,
        clock,
        service,
    })
}

/// Scenario offer: three mangoes (60.00) for two bags of rice (50.00)
pub fn mango_for_rice() -> barter_exchange::service::Proposal {
    barter_exchange::service::Proposal {
        target_product: ProductRef::new("mango"),
        target_quantity: 3,
        offered_items: vec![OfferLine::new("rice", 2, Amount::whole(25))],
        proposal_message: "fresh harvest".into(),
        ..Default::default()
    }
}

/// A pending barter built without the service, for store level tests
pub fn pending_barter(
    number: &str,
    proposer: &str,
    target: &str,
    proposed_at: DateTime<Utc>,
) -> Barter {
    Barter::open(OpenBarter {
        id: BarterId::new(format!("barter-{number}")),
        barter_number: number.into(),
        proposing_vendor_id: VendorId::new(format!("id-{proposer}")),
        proposing_vendor_handle: handle(proposer),
        target_vendor_id: VendorId::new(format!("id-{target}")),
        target_vendor_handle: handle(target),
        target_product: ProductRef::new("mango"),
        target_quantity: 1,
        target_unit_price: Amount::whole(20),
        offered: vec![OfferLine::new("rice", 1, Amount::whole(25))],
        proposal_message: String::new(),
        quality_notes: String::new(),
        condition_requirements: String::new(),
        proposed_at: TimeStamp::from(proposed_at),
        ttl: Duration::days(7),
    })
    .unwrap()
}
