//! Barter aggregate and its negotiation state machine
//!
//! A [`Barter`] is created `pending` and then moves through the transitions
//! below. Every mutation goes through a method on [`Barter`] which checks the
//! transition against [`BarterStatus::can_transition_to`] first, so a failed
//! call never leaves the record half written.
//!
//! ```text
//! pending ─┬─> accepted ──> completed
//!          ├─> rejected
//!          ├─> counter-offered
//!          └─> expired
//! ```
//!
//! `counter-offered` and `expired` have no outgoing transitions. `cancelled`
//! is a valid stored status but no transition leads to it.
use super::error::{TransitionError, ValidationError};
use super::types::{BarterId, ProductRef, TimeStamp, VendorHandle, VendorId};
use super::value::{self, Amount};
use chrono::{Duration, Utc};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum BarterStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    CounterOffered,
    #[n(4)]
    Cancelled,
    #[n(5)]
    Completed,
    #[n(6)]
    Expired,
}

impl BarterStatus {
    pub const ALL: [BarterStatus; 7] = [
        BarterStatus::Pending,
        BarterStatus::Accepted,
        BarterStatus::Rejected,
        BarterStatus::CounterOffered,
        BarterStatus::Cancelled,
        BarterStatus::Completed,
        BarterStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BarterStatus::Pending => "pending",
            BarterStatus::Accepted => "accepted",
            BarterStatus::Rejected => "rejected",
            BarterStatus::CounterOffered => "counter-offered",
            BarterStatus::Cancelled => "cancelled",
            BarterStatus::Completed => "completed",
            BarterStatus::Expired => "expired",
        }
    }

    pub fn can_transition_to(&self, to: BarterStatus) -> bool {
        use BarterStatus::*;
        matches!(
            (self, to),
            (Pending, Accepted | Rejected | CounterOffered | Expired) | (Accepted, Completed)
        )
    }

    /// Statuses that are settled for good
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BarterStatus::Rejected | BarterStatus::Cancelled | BarterStatus::Completed
        )
    }
}

impl fmt::Display for BarterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown barter status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for BarterStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BarterStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_owned()))
    }
}

/// Which side of a barter a vendor is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Proposer,
    Target,
}

/// Caller supplied line of an offer or counter offer, before pricing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferLine {
    pub product: ProductRef,
    pub quantity: u32,
    pub unit_price: Amount,
    pub notes: String,
}

impl OfferLine {
    pub fn new(product: impl Into<ProductRef>, quantity: u32, unit_price: Amount) -> Self {
        Self {
            product: product.into(),
            quantity,
            unit_price,
            notes: String::new(),
        }
    }
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// A priced line. `line_total == quantity * unit_price` and the price is a
/// snapshot taken when the line was offered.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BarterItem {
    #[n(0)]
    pub product: ProductRef,
    #[n(1)]
    pub quantity: u32,
    #[n(2)]
    pub unit_price: Amount,
    #[n(3)]
    pub line_total: Amount,
    #[n(4)]
    pub notes: String,
}

impl BarterItem {
    pub fn price(line: &OfferLine) -> Result<Self, ValidationError> {
        if line.quantity == 0 {
            return Err(ValidationError::ZeroQuantity(line.product.clone()));
        }
        if line.unit_price.is_negative() {
            return Err(ValidationError::NegativePrice(line.product.clone()));
        }

        Ok(Self {
            product: line.product.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: value::line_total(line.quantity, line.unit_price)?,
            notes: line.notes.clone(),
        })
    }
}

pub fn price_items(lines: &[OfferLine]) -> Result<Vec<BarterItem>, ValidationError> {
    lines.iter().map(BarterItem::price).collect()
}

pub fn items_total(items: &[BarterItem]) -> Result<Amount, ValidationError> {
    value::checked_sum(items.iter().map(|item| item.line_total))
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CounterOffer {
    #[n(0)]
    pub items: Vec<BarterItem>,
    #[n(1)]
    pub total_value: Amount,
    #[n(2)]
    pub cash_adjustment: Amount,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

impl CounterOffer {
    pub fn new(
        lines: &[OfferLine],
        cash_adjustment: Amount,
        message: String,
        created_at: TimeStamp<Utc>,
    ) -> Result<Self, ValidationError> {
        if lines.is_empty() {
            return Err(ValidationError::EmptyCounterOffer);
        }
        let items = price_items(lines)?;
        let total_value = items_total(&items)?;

        Ok(Self {
            items,
            total_value,
            cash_adjustment,
            message,
            created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Coordinates {
    #[n(0)]
    pub lat: f64,
    #[n(1)]
    pub lng: f64,
}

/// Where and when the goods change hands. Also used as a partial update,
/// where `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct ExchangeLocation {
    #[n(0)]
    pub address: Option<String>,
    #[n(1)]
    pub city: Option<String>,
    #[n(2)]
    pub coordinates: Option<Coordinates>,
    #[n(3)]
    pub meeting_time: Option<TimeStamp<Utc>>,
}

impl ExchangeLocation {
    pub fn merge(&mut self, update: ExchangeLocation) {
        if update.address.is_some() {
            self.address = update.address;
        }
        if update.city.is_some() {
            self.city = update.city;
        }
        if update.coordinates.is_some() {
            self.coordinates = update.coordinates;
        }
        if update.meeting_time.is_some() {
            self.meeting_time = update.meeting_time;
        }
    }
    pub fn is_empty(&self) -> bool {
        self == &ExchangeLocation::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PartyReview {
    #[n(0)]
    pub score: u8,
    #[n(1)]
    pub feedback: String,
}

impl PartyReview {
    pub fn new(score: u8, feedback: impl Into<String>) -> Result<Self, ValidationError> {
        if !(1..=5).contains(&score) {
            return Err(ValidationError::RatingOutOfRange(score));
        }
        Ok(Self {
            score,
            feedback: feedback.into(),
        })
    }
}

/// One review slot per party, each only written by that party
#[derive(Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct BarterRating {
    #[n(0)]
    pub proposer: Option<PartyReview>,
    #[n(1)]
    pub target: Option<PartyReview>,
}

/// Everything needed to open a new barter. Prices come from the caller and
/// are snapshotted as given.
#[derive(Debug, Clone)]
pub struct OpenBarter {
    pub id: BarterId,
    pub barter_number: String,
    pub proposing_vendor_id: VendorId,
    pub proposing_vendor_handle: VendorHandle,
    pub target_vendor_id: VendorId,
    pub target_vendor_handle: VendorHandle,
    pub target_product: ProductRef,
    pub target_quantity: u32,
    pub target_unit_price: Amount,
    pub offered: Vec<OfferLine>,
    pub proposal_message: String,
    pub quality_notes: String,
    pub condition_requirements: String,
    pub proposed_at: TimeStamp<Utc>,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Barter {
    #[n(0)]
    pub id: BarterId,
    #[n(1)]
    pub barter_number: String,
    #[n(2)]
    pub proposing_vendor_id: VendorId,
    #[n(3)]
    pub proposing_vendor_handle: VendorHandle,
    #[n(4)]
    pub target_vendor_id: VendorId,
    #[n(5)]
    pub target_vendor_handle: VendorHandle,
    #[n(6)]
    pub target_product: ProductRef,
    #[n(7)]
    pub target_quantity: u32,
    #[n(8)]
    pub target_value: Amount,
    #[n(9)]
    pub offered_items: Vec<BarterItem>,
    #[n(10)]
    pub total_offered_value: Amount,
    #[n(11)]
    pub value_difference: Amount,
    #[n(12)]
    pub cash_adjustment: Amount,
    #[n(13)]
    pub status: BarterStatus,
    #[n(14)]
    pub proposal_message: String,
    #[n(15)]
    pub response_message: String,
    #[n(16)]
    pub counter_offer: Option<CounterOffer>,
    #[n(17)]
    pub quality_notes: String,
    #[n(18)]
    pub condition_requirements: String,
    #[n(19)]
    pub proposed_at: TimeStamp<Utc>,
    #[n(20)]
    pub responded_at: Option<TimeStamp<Utc>>,
    #[n(21)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(22)]
    pub expires_at: TimeStamp<Utc>,
    #[n(23)]
    pub exchange_location: Option<ExchangeLocation>,
    #[n(24)]
    pub rating: BarterRating,
    #[n(25)]
    pub is_deleted: bool,
    // bumped by the store on every successful write
    #[n(26)]
    pub version: u64,
}

impl Barter {
    /// Price the offer and build a `pending` barter
    pub fn open(terms: OpenBarter) -> Result<Self, ValidationError> {
        if terms.offered.is_empty() {
            return Err(ValidationError::EmptyOffer);
        }
        if terms.target_quantity == 0 {
            return Err(ValidationError::ZeroTargetQuantity);
        }
        if terms.proposing_vendor_handle == terms.target_vendor_handle {
            return Err(ValidationError::SelfBarter);
        }

        let target_value = value::line_total(terms.target_quantity, terms.target_unit_price)?;
        let offered_items = price_items(&terms.offered)?;
        let total_offered_value = items_total(&offered_items)?;
        let value_difference = value::value_difference(target_value, total_offered_value)?;
        let expires_at = terms.proposed_at.plus(terms.ttl);

        Ok(Self {
            id: terms.id,
            barter_number: terms.barter_number,
            proposing_vendor_id: terms.proposing_vendor_id,
            proposing_vendor_handle: terms.proposing_vendor_handle,
            target_vendor_id: terms.target_vendor_id,
            target_vendor_handle: terms.target_vendor_handle,
            target_product: terms.target_product,
            target_quantity: terms.target_quantity,
            target_value,
            offered_items,
            total_offered_value,
            value_difference,
            cash_adjustment: Amount::ZERO,
            status: BarterStatus::Pending,
            proposal_message: terms.proposal_message,
            response_message: String::new(),
            counter_offer: None,
            quality_notes: terms.quality_notes,
            condition_requirements: terms.condition_requirements,
            proposed_at: terms.proposed_at,
            responded_at: None,
            completed_at: None,
            expires_at,
            exchange_location: None,
            rating: BarterRating::default(),
            is_deleted: false,
            version: 0,
        })
    }

    pub fn party_of(&self, handle: &VendorHandle) -> Option<Party> {
        if &self.proposing_vendor_handle == handle {
            Some(Party::Proposer)
        } else if &self.target_vendor_handle == handle {
            Some(Party::Target)
        } else {
            None
        }
    }

    /// A pending offer whose deadline has passed
    pub fn is_expired(&self, now: &TimeStamp<Utc>) -> bool {
        self.status == BarterStatus::Pending && now > &self.expires_at
    }

    fn ensure(&self, to: BarterStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }

    pub fn accept(
        &mut self,
        response_message: String,
        location: Option<ExchangeLocation>,
        now: TimeStamp<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(BarterStatus::Accepted)?;

        if let Some(update) = location.filter(|update| !update.is_empty()) {
            self.exchange_location
                .get_or_insert_with(ExchangeLocation::default)
                .merge(update);
        }
        self.status = BarterStatus::Accepted;
        self.response_message = response_message;
        self.responded_at = Some(now);
        Ok(())
    }

    pub fn reject(
        &mut self,
        response_message: String,
        now: TimeStamp<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(BarterStatus::Rejected)?;

        self.status = BarterStatus::Rejected;
        self.response_message = response_message;
        self.responded_at = Some(now);
        Ok(())
    }

    /// Replace any previous counter offer wholesale
    pub fn counter(
        &mut self,
        offer: CounterOffer,
        now: TimeStamp<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(BarterStatus::CounterOffered)?;

        self.status = BarterStatus::CounterOffered;
        self.counter_offer = Some(offer);
        self.responded_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self) -> Result<(), TransitionError> {
        self.ensure(BarterStatus::Expired)?;

        self.status = BarterStatus::Expired;
        Ok(())
    }

    pub fn complete(
        &mut self,
        party: Party,
        review: Option<PartyReview>,
        now: TimeStamp<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure(BarterStatus::Completed)?;

        if let Some(review) = review {
            match party {
                Party::Proposer => self.rating.proposer = Some(review),
                Party::Target => self.rating.target = Some(review),
            }
        }
        self.status = BarterStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(offered: Vec<OfferLine>) -> OpenBarter {
        OpenBarter {
            id: BarterId::new("barter1test"),
            barter_number: "BTR-1700000000000-042".into(),
            proposing_vendor_id: VendorId::new("v-a"),
            proposing_vendor_handle: VendorHandle::new("alpha-farm"),
            target_vendor_id: VendorId::new("v-b"),
            target_vendor_handle: VendorHandle::new("beta-orchard"),
            target_product: ProductRef::new("mango"),
            target_quantity: 3,
            target_unit_price: Amount::whole(20),
            offered,
            proposal_message: String::new(),
            quality_notes: String::new(),
            condition_requirements: String::new(),
            proposed_at: TimeStamp::new(),
            ttl: Duration::days(7),
        }
    }

    fn pending() -> Barter {
        Barter::open(terms(vec![OfferLine::new("rice", 2, Amount::whole(25))])).unwrap()
    }

    #[test]
    fn open_computes_values() {
        let barter = pending();

        assert_eq!(barter.status, BarterStatus::Pending);
        assert_eq!(barter.target_value, Amount::whole(60));
        assert_eq!(barter.total_offered_value, Amount::whole(50));
        assert_eq!(barter.value_difference, Amount::whole(10));
        assert_eq!(barter.expires_at, barter.proposed_at.plus(Duration::days(7)));
        assert_eq!(barter.offered_items[0].line_total, Amount::whole(50));
    }

    #[test]
    fn open_rejects_empty_and_self_barters() {
        assert_eq!(Barter::open(terms(vec![])), Err(ValidationError::EmptyOffer));

        let mut own = terms(vec![OfferLine::new("rice", 1, Amount::whole(1))]);
        own.target_vendor_handle = own.proposing_vendor_handle.clone();
        assert_eq!(Barter::open(own), Err(ValidationError::SelfBarter));

        let zero = terms(vec![OfferLine::new("rice", 0, Amount::whole(1))]);
        assert_eq!(
            Barter::open(zero),
            Err(ValidationError::ZeroQuantity(ProductRef::new("rice")))
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for status in BarterStatus::ALL {
            assert_eq!(status.as_str().parse::<BarterStatus>(), Ok(status));
        }
        assert!("archived".parse::<BarterStatus>().is_err());
        assert_eq!(BarterStatus::CounterOffered.to_string(), "counter-offered");
    }

    #[test]
    fn only_pending_and_accepted_have_exits() {
        for from in BarterStatus::ALL {
            let exits = BarterStatus::ALL
                .into_iter()
                .filter(|to| from.can_transition_to(*to))
                .count();
            match from {
                BarterStatus::Pending => assert_eq!(exits, 4),
                BarterStatus::Accepted => assert_eq!(exits, 1),
                _ => assert_eq!(exits, 0, "{from} should be closed"),
            }
        }
    }

    #[test]
    fn counter_offered_is_closed() {
        let mut barter = pending();
        let offer = CounterOffer::new(
            &[OfferLine::new("mango", 1, Amount::whole(55))],
            Amount::whole(5),
            "how about this".into(),
            TimeStamp::new(),
        )
        .unwrap();
        barter.counter(offer, TimeStamp::new()).unwrap();

        let err = barter.accept(String::new(), None, TimeStamp::new()).unwrap_err();
        assert_eq!(err.from, BarterStatus::CounterOffered);
        assert!(barter.reject(String::new(), TimeStamp::new()).is_err());
        assert!(barter.expire().is_err());
    }

    #[test]
    fn accept_merges_location_fields() {
        let mut barter = pending();
        barter.exchange_location = Some(ExchangeLocation {
            address: Some("Road 4".into()),
            city: Some("Dhaka".into()),
            ..Default::default()
        });

        let update = ExchangeLocation {
            city: Some("Khulna".into()),
            ..Default::default()
        };
        barter.accept("ok".into(), Some(update), TimeStamp::new()).unwrap();

        let location = barter.exchange_location.unwrap();
        assert_eq!(location.address.as_deref(), Some("Road 4"));
        assert_eq!(location.city.as_deref(), Some("Khulna"));
        assert_eq!(barter.response_message, "ok");
        assert!(barter.responded_at.is_some());
    }

    #[test]
    fn expiry_is_a_pending_only_predicate() {
        let mut barter = pending();
        let later = barter.expires_at.plus(Duration::seconds(1));

        assert!(!barter.is_expired(&barter.expires_at.clone()));
        assert!(barter.is_expired(&later));

        barter.reject(String::new(), TimeStamp::new()).unwrap();
        assert!(!barter.is_expired(&later));
    }

    #[test]
    fn completion_writes_callers_slot() {
        let mut barter = pending();
        barter.accept(String::new(), None, TimeStamp::new()).unwrap();

        let review = PartyReview::new(5, "great").unwrap();
        barter.complete(Party::Target, Some(review.clone()), TimeStamp::new()).unwrap();

        assert_eq!(barter.status, BarterStatus::Completed);
        assert_eq!(barter.rating.target, Some(review));
        assert_eq!(barter.rating.proposer, None);
        assert!(barter.complete(Party::Proposer, None, TimeStamp::new()).is_err());
    }

    #[test]
    fn review_scores_are_bounded() {
        assert_eq!(
            PartyReview::new(0, ""),
            Err(ValidationError::RatingOutOfRange(0))
        );
        assert_eq!(
            PartyReview::new(6, ""),
            Err(ValidationError::RatingOutOfRange(6))
        );
    }

    #[test]
    fn barter_cbor_roundtrip() {
        let mut barter = pending();
        barter.exchange_location = Some(ExchangeLocation {
            coordinates: Some(Coordinates { lat: 23.8, lng: 90.4 }),
            ..Default::default()
        });

        let encoded = minicbor::to_vec(&barter).unwrap();
        let decoded: Barter = minicbor::decode(&encoded).unwrap();

        assert_eq!(barter, decoded);
    }
}
