//! Counterparty notifications for barter state changes
//!
//! Delivery is best effort. The service logs and drops any error a
//! [`Notifier`] returns; a transition that has been stored is never undone
//! because its notification failed.
use super::barter::Barter;
use super::error::StoreError;
use super::types::{BarterId, TimeStamp, VendorHandle};
use super::utils;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum BarterEvent {
    #[n(0)]
    NewOffer,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    CounterOffer,
    #[n(4)]
    Expired,
}

impl BarterEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarterEvent::NewOffer => "new_barter_offer",
            BarterEvent::Accepted => "barter_accepted",
            BarterEvent::Rejected => "barter_rejected",
            BarterEvent::CounterOffer => "barter_counter_offer",
            BarterEvent::Expired => "barter_expired",
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Tell the party opposite `triggered_by` that `barter` changed
    fn send(
        &self,
        event: BarterEvent,
        barter: &Barter,
        triggered_by: &VendorHandle,
    ) -> anyhow::Result<()>;
}

/// The party that should hear about an action taken by `sender`
pub fn recipient_for<'a>(barter: &'a Barter, sender: &VendorHandle) -> &'a VendorHandle {
    if sender == &barter.proposing_vendor_handle {
        &barter.target_vendor_handle
    } else {
        &barter.proposing_vendor_handle
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub recipient: VendorHandle,
    #[n(2)]
    pub sender: VendorHandle,
    #[n(3)]
    pub event: BarterEvent,
    #[n(4)]
    pub barter_id: BarterId,
    #[n(5)]
    pub barter_number: String,
    #[n(6)]
    pub title: String,
    #[n(7)]
    pub message: String,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub read: bool,
}

impl Notification {
    pub fn render(
        event: BarterEvent,
        barter: &Barter,
        sender: &VendorHandle,
    ) -> anyhow::Result<Self> {
        let product = &barter.target_product;
        let (title, message) = match event {
            BarterEvent::NewOffer => (
                "New Barter Offer Received",
                format!("{sender} wants to barter for your {product}"),
            ),
            BarterEvent::Accepted => (
                "Barter Offer Accepted",
                format!("Your barter offer for {product} has been accepted"),
            ),
            BarterEvent::Rejected => (
                "Barter Offer Rejected",
                format!("Your barter offer for {product} was rejected"),
            ),
            BarterEvent::CounterOffer => (
                "New Counter Offer",
                format!("{sender} made a counter offer for {product}"),
            ),
            BarterEvent::Expired => (
                "Barter Offer Expired",
                format!("Barter offer for {product} has expired"),
            ),
        };

        Ok(Self {
            id: utils::new_uuid_to_bech32("note")?,
            recipient: recipient_for(barter, sender).clone(),
            sender: sender.clone(),
            event,
            barter_id: barter.id.clone(),
            barter_number: barter.barter_number.clone(),
            title: title.to_owned(),
            message,
            created_at: TimeStamp::new(),
            read: false,
        })
    }
}

/// Persists notifications in a sled tree for the recipient to read later
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    tree: sled::Tree,
}

fn outbox_key(recipient: &VendorHandle, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(recipient.as_bytes().len() + id.len() + 1);
    key.extend_from_slice(recipient.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

fn outbox_prefix(recipient: &VendorHandle) -> Vec<u8> {
    let mut prefix = recipient.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

impl OutboxNotifier {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree("notifications")?,
        })
    }

    pub fn store(&self, note: &Notification) -> Result<(), StoreError> {
        self.tree
            .insert(outbox_key(&note.recipient, &note.id), minicbor::to_vec(note)?)?;
        Ok(())
    }

    /// All notifications for `recipient`, newest first
    pub fn for_recipient(
        &self,
        recipient: &VendorHandle,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut notes = self
            .tree
            .scan_prefix(outbox_prefix(recipient))
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(minicbor::decode::<Notification>(bytes.as_ref())?)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notes)
    }

    pub fn unread_count(&self, recipient: &VendorHandle) -> Result<usize, StoreError> {
        Ok(self
            .for_recipient(recipient)?
            .iter()
            .filter(|note| !note.read)
            .count())
    }

    /// Returns false when no such notification exists for `recipient`
    pub fn mark_read(&self, recipient: &VendorHandle, id: &str) -> Result<bool, StoreError> {
        let key = outbox_key(recipient, id);
        let Some(bytes) = self.tree.get(&key)? else {
            return Ok(false);
        };
        let mut note: Notification = minicbor::decode(bytes.as_ref())?;
        note.read = true;
        self.tree.insert(key, minicbor::to_vec(&note)?)?;
        Ok(true)
    }
}

impl Notifier for OutboxNotifier {
    fn send(
        &self,
        event: BarterEvent,
        barter: &Barter,
        triggered_by: &VendorHandle,
    ) -> anyhow::Result<()> {
        let note = Notification::render(event, barter, triggered_by)?;
        self.store(&note)?;
        tracing::debug!(
            event = event.as_str(),
            recipient = %note.recipient,
            "notification stored"
        );
        Ok(())
    }
}

struct Queued {
    event: BarterEvent,
    barter: Barter,
    sender: VendorHandle,
}

/// Hands notifications to a background task so a slow [`Notifier`] never
/// holds up the caller. Failures of the inner notifier are logged by the task.
#[derive(Debug, Clone)]
pub struct QueuedNotifier {
    tx: mpsc::UnboundedSender<Queued>,
}

impl QueuedNotifier {
    /// Start the delivery task on `runtime`. The task ends once every
    /// `QueuedNotifier` clone has been dropped and the queue is drained.
    pub fn spawn<N>(
        inner: Arc<N>,
        runtime: &tokio::runtime::Handle,
    ) -> (Self, tokio::task::JoinHandle<()>)
    where
        N: Notifier + ?Sized + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
        let worker = runtime.spawn(async move {
            while let Some(queued) = rx.recv().await {
                if let Err(err) = inner.send(queued.event, &queued.barter, &queued.sender) {
                    tracing::warn!(
                        event = queued.event.as_str(),
                        barter = %queued.barter.barter_number,
                        error = %err,
                        "queued barter notification failed"
                    );
                }
            }
        });
        (Self { tx }, worker)
    }
}

impl Notifier for QueuedNotifier {
    fn send(
        &self,
        event: BarterEvent,
        barter: &Barter,
        triggered_by: &VendorHandle,
    ) -> anyhow::Result<()> {
        self.tx
            .send(Queued {
                event,
                barter: barter.clone(),
                sender: triggered_by.clone(),
            })
            .map_err(|_| anyhow::anyhow!("notification worker has stopped"))
    }
}
