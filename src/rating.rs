//! Product feedback and rating aggregates
//!
//! Customers leave at most one feedback per product; submitting again
//! overwrites the earlier one. Only `visible` feedback counts towards an
//! aggregate. The product aggregate is recomputed before
//! [`RatingService::submit_feedback`] returns. The vendor aggregate spans
//! every product of the vendor and is recomputed through a [`Debouncer`], so a
//! burst of feedback for one vendor costs a single recompute.
use super::clock::{Clock, SystemClock};
use super::config::BarterConfig;
use super::debounce::Debouncer;
use super::directory::{ProductDirectory, VendorDirectory};
use super::error::{BarterError, StoreError, ValidationError};
use super::scheduler::Scheduler;
use super::types::{ProductRef, TimeStamp, UserId, VendorId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reports after which a visible feedback is held for review
pub const REPORTS_BEFORE_REVIEW: usize = 3;
/// Most testimonials returned by [`RatingService::testimonials`]
pub const TESTIMONIAL_LIMIT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum ModerationStatus {
    #[n(0)]
    Visible,
    #[n(1)]
    Hidden,
    #[n(2)]
    Pending,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Visible => "visible",
            ModerationStatus::Hidden => "hidden",
            ModerationStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Feedback {
    #[n(0)]
    pub product: ProductRef,
    #[n(1)]
    pub vendor_id: VendorId,
    #[n(2)]
    pub user_id: UserId,
    #[n(3)]
    pub rating: u8,
    #[n(4)]
    pub title: String,
    #[n(5)]
    pub comment: String,
    #[n(6)]
    pub moderation: ModerationStatus,
    #[n(7)]
    pub report_reasons: Vec<String>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
    #[n(9)]
    pub updated_at: TimeStamp<Utc>,
    #[n(10)]
    pub helpful_votes: u32,
    /// Users who marked this feedback helpful, one vote each
    #[n(11)]
    pub helpful_voters: Vec<UserId>,
}

impl Feedback {
    pub fn is_visible(&self) -> bool {
        self.moderation == ModerationStatus::Visible
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackInput {
    pub rating: u8,
    pub title: String,
    pub comment: String,
}

/// Who is submitting feedback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reviewer {
    Customer(UserId),
    Vendor(VendorId),
}

/// Average rounded to two decimals and the number of ratings behind it
#[derive(Debug, Clone, Copy, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct RatingSummary {
    #[n(0)]
    pub average: f64,
    #[n(1)]
    pub count: u64,
}

impl RatingSummary {
    pub fn from_ratings<I>(ratings: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        let (sum, count) = ratings
            .into_iter()
            .fold((0u64, 0u64), |(sum, count), rating| (sum + u64::from(rating), count + 1));
        if count == 0 {
            return Self::default();
        }
        Self {
            average: round2(sum as f64 / count as f64),
            count,
        }
    }
}

/// Star histogram of a product's visible feedback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingDistribution {
    /// `counts[0]` is one star, `counts[4]` five stars
    pub counts: [u64; 5],
    pub total: u64,
    pub average: f64,
}

impl RatingDistribution {
    pub fn stars(&self, stars: u8) -> u64 {
        match stars {
            1..=5 => self.counts[usize::from(stars - 1)],
            _ => 0,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn feedback_key(product: &ProductRef, user: &UserId) -> Vec<u8> {
    let mut key = Vec::with_capacity(product.as_bytes().len() + user.as_bytes().len() + 1);
    key.extend_from_slice(product.as_bytes());
    key.push(0);
    key.extend_from_slice(user.as_bytes());
    key
}

fn decode_all(iter: sled::Iter) -> Result<Vec<Feedback>, StoreError> {
    let mut found = Vec::new();
    for entry in iter {
        let (_, bytes) = entry?;
        found.push(minicbor::decode(bytes.as_ref())?);
    }
    Ok(found)
}

/// Sled trees behind the rating service
#[derive(Debug, Clone)]
pub struct RatingStore {
    feedback: sled::Tree,
    products: sled::Tree,
    vendors: sled::Tree,
}

impl RatingStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            feedback: db.open_tree("feedback")?,
            products: db.open_tree("product_ratings")?,
            vendors: db.open_tree("vendor_ratings")?,
        })
    }

    pub fn put(&self, feedback: &Feedback) -> Result<(), StoreError> {
        self.feedback.insert(
            feedback_key(&feedback.product, &feedback.user_id),
            minicbor::to_vec(feedback)?,
        )?;
        Ok(())
    }

    pub fn get(
        &self,
        product: &ProductRef,
        user: &UserId,
    ) -> Result<Option<Feedback>, StoreError> {
        match self.feedback.get(feedback_key(product, user))? {
            Some(bytes) => Ok(Some(minicbor::decode(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn for_product(&self, product: &ProductRef) -> Result<Vec<Feedback>, StoreError> {
        let mut prefix = product.as_bytes().to_vec();
        prefix.push(0);
        decode_all(self.feedback.scan_prefix(prefix))
    }

    pub fn for_vendor(&self, vendor: &VendorId) -> Result<Vec<Feedback>, StoreError> {
        let mut all = self.all()?;
        all.retain(|feedback| &feedback.vendor_id == vendor);
        Ok(all)
    }

    pub fn all(&self) -> Result<Vec<Feedback>, StoreError> {
        decode_all(self.feedback.iter())
    }

    fn put_summary(
        tree: &sled::Tree,
        key: &[u8],
        summary: &RatingSummary,
    ) -> Result<(), StoreError> {
        tree.insert(key, minicbor::to_vec(summary)?)?;
        Ok(())
    }

    fn summary(tree: &sled::Tree, key: &[u8]) -> Result<RatingSummary, StoreError> {
        match tree.get(key)? {
            Some(bytes) => Ok(minicbor::decode(bytes.as_ref())?),
            None => Ok(RatingSummary::default()),
        }
    }

    pub fn product_summary(&self, product: &ProductRef) -> Result<RatingSummary, StoreError> {
        Self::summary(&self.products, product.as_bytes())
    }

    pub fn vendor_summary(&self, vendor: &VendorId) -> Result<RatingSummary, StoreError> {
        Self::summary(&self.vendors, vendor.as_bytes())
    }

    /// Recompute and store the aggregate of one product
    pub fn refresh_product(&self, product: &ProductRef) -> Result<RatingSummary, StoreError> {
        let summary = RatingSummary::from_ratings(
            self.for_product(product)?
                .iter()
                .filter(|feedback| feedback.is_visible())
                .map(|feedback| feedback.rating),
        );
        Self::put_summary(&self.products, product.as_bytes(), &summary)?;
        debug!(
            %product,
            average = summary.average,
            count = summary.count,
            "product rating refreshed"
        );
        Ok(summary)
    }

    /// Recompute and store the storewide aggregate of one vendor
    pub fn refresh_vendor(&self, vendor: &VendorId) -> Result<RatingSummary, StoreError> {
        let summary = RatingSummary::from_ratings(
            self.for_vendor(vendor)?
                .iter()
                .filter(|feedback| feedback.is_visible())
                .map(|feedback| feedback.rating),
        );
        Self::put_summary(&self.vendors, vendor.as_bytes(), &summary)?;
        debug!(
            %vendor,
            average = summary.average,
            count = summary.count,
            "vendor rating refreshed"
        );
        Ok(summary)
    }
}

pub struct RatingService<S: Scheduler> {
    store: RatingStore,
    products: Arc<dyn ProductDirectory>,
    vendors: Arc<dyn VendorDirectory>,
    debouncer: Debouncer<VendorId, S>,
    clock: Arc<dyn Clock>,
}

impl<S: Scheduler> RatingService<S> {
    /// The vendor aggregate waits `config.rating_debounce` after the last
    /// feedback for that vendor
    pub fn new(
        instance: &sled::Db,
        products: Arc<dyn ProductDirectory>,
        vendors: Arc<dyn VendorDirectory>,
        scheduler: Arc<S>,
        config: &BarterConfig,
    ) -> Result<Self, BarterError> {
        Ok(Self {
            store: RatingStore::open(instance)?,
            products,
            vendors,
            debouncer: Debouncer::new(scheduler, config.rating_debounce),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &RatingStore {
        &self.store
    }

    /// Queue a recompute of `vendor`'s aggregate, replacing any queued one
    fn schedule_vendor(&self, vendor: VendorId) {
        let store = self.store.clone();
        let key = vendor.clone();
        self.debouncer.trigger(key, move || {
            if let Err(err) = store.refresh_vendor(&vendor) {
                warn!(%vendor, error = %err, "vendor rating aggregate update failed");
            }
        });
    }

    /// Whether a vendor recompute is waiting for its quiet period to end
    pub fn vendor_refresh_pending(&self, vendor: &VendorId) -> bool {
        self.debouncer.is_pending(vendor)
    }

    /// Run a queued vendor recompute now instead of waiting
    pub fn flush_vendor(&self, vendor: &VendorId) -> Result<RatingSummary, BarterError> {
        self.debouncer.cancel(vendor);
        Ok(self.store.refresh_vendor(vendor)?)
    }

    /// Create or overwrite `reviewer`'s feedback on `product`. Returns the
    /// refreshed product aggregate.
    pub fn submit_feedback(
        &self,
        reviewer: &Reviewer,
        product: &ProductRef,
        input: FeedbackInput,
    ) -> Result<RatingSummary, BarterError> {
        if !(1..=5).contains(&input.rating) {
            return Err(ValidationError::RatingOutOfRange(input.rating).into());
        }

        // Resolve the product and the vendor that sells it
        let product = self
            .products
            .find_by_id(product)
            .map_err(BarterError::Directory)?
            .ok_or_else(|| BarterError::NotFound("product not found".into()))?;
        let vendor = self
            .vendors
            .find_by_handle(&product.owner)
            .map_err(BarterError::Directory)?
            .ok_or_else(|| BarterError::NotFound("vendor not found for product".into()))?;

        let user = match reviewer {
            Reviewer::Vendor(id) if id == &vendor.id => {
                return Err(BarterError::Forbidden(
                    "vendors cannot review their own products".into(),
                ));
            }
            Reviewer::Vendor(_) => {
                return Err(BarterError::Forbidden(
                    "only customers can review products".into(),
                ));
            }
            Reviewer::Customer(user) => user,
        };

        // Upsert, keeping moderation state of an earlier submission
        let now = TimeStamp::from(self.clock.now());
        let feedback = match self.store.get(&product.id, user)? {
            Some(existing) => Feedback {
                rating: input.rating,
                title: input.title,
                comment: input.comment,
                updated_at: now,
                ..existing
            },
            None => Feedback {
                product: product.id.clone(),
                vendor_id: vendor.id.clone(),
                user_id: user.clone(),
                rating: input.rating,
                title: input.title,
                comment: input.comment,
                moderation: ModerationStatus::Visible,
                report_reasons: Vec::new(),
                created_at: now.clone(),
                updated_at: now,
                helpful_votes: 0,
                helpful_voters: Vec::new(),
            },
        };
        self.store.put(&feedback)?;
        info!(
            product = %product.id,
            user = %user,
            rating = feedback.rating,
            "feedback submitted"
        );

        let summary = self.store.refresh_product(&product.id)?;
        self.schedule_vendor(feedback.vendor_id);
        Ok(summary)
    }

    fn load(&self, product: &ProductRef, user: &UserId) -> Result<Feedback, BarterError> {
        self.store
            .get(product, user)?
            .ok_or_else(|| BarterError::NotFound("feedback not found".into()))
    }

    fn save_moderated(&self, feedback: &Feedback) -> Result<(), BarterError> {
        self.store.put(feedback)?;
        self.store.refresh_product(&feedback.product)?;
        self.schedule_vendor(feedback.vendor_id.clone());
        Ok(())
    }

    /// Change the moderation status of a feedback and re-run both aggregates
    pub fn moderate(
        &self,
        product: &ProductRef,
        user: &UserId,
        status: ModerationStatus,
    ) -> Result<Feedback, BarterError> {
        let mut feedback = self.load(product, user)?;
        if feedback.moderation == status {
            return Ok(feedback);
        }

        feedback.moderation = status;
        feedback.updated_at = TimeStamp::from(self.clock.now());
        self.save_moderated(&feedback)?;
        info!(%product, %user, status = status.as_str(), "feedback moderated");
        Ok(feedback)
    }

    /// Make a feedback visible again. With `clear_reports` its report reasons
    /// are dropped too, so it takes a fresh set of reports to hold it again.
    pub fn approve(
        &self,
        product: &ProductRef,
        user: &UserId,
        clear_reports: bool,
    ) -> Result<Feedback, BarterError> {
        let mut feedback = self.load(product, user)?;
        let cleared = clear_reports && !feedback.report_reasons.is_empty();
        if feedback.is_visible() && !cleared {
            return Ok(feedback);
        }

        if cleared {
            feedback.report_reasons.clear();
        }
        feedback.updated_at = TimeStamp::from(self.clock.now());
        if feedback.is_visible() {
            self.store.put(&feedback)?;
        } else {
            feedback.moderation = ModerationStatus::Visible;
            self.save_moderated(&feedback)?;
        }
        info!(%product, %user, cleared, "feedback approved");
        Ok(feedback)
    }

    /// Record a report against a feedback. Enough distinct reasons take a
    /// visible feedback out of the aggregates until it is moderated.
    pub fn report(
        &self,
        product: &ProductRef,
        user: &UserId,
        reason: &str,
    ) -> Result<Feedback, BarterError> {
        let mut feedback = self.load(product, user)?;
        if feedback.report_reasons.iter().any(|known| known == reason) {
            return Ok(feedback);
        }
        feedback.report_reasons.push(reason.to_owned());

        let held = feedback.is_visible() && feedback.report_reasons.len() >= REPORTS_BEFORE_REVIEW;
        if held {
            feedback.moderation = ModerationStatus::Pending;
            self.save_moderated(&feedback)?;
            info!(%product, %user, "feedback held for review");
        } else {
            self.store.put(&feedback)?;
        }
        Ok(feedback)
    }

    /// Count `voter` as finding the feedback helpful. Voting twice is a no-op.
    /// Returns the vote total.
    pub fn vote_helpful(
        &self,
        product: &ProductRef,
        user: &UserId,
        voter: &UserId,
    ) -> Result<u32, BarterError> {
        let mut feedback = self.load(product, user)?;
        if feedback.helpful_voters.contains(voter) {
            return Ok(feedback.helpful_votes);
        }

        feedback.helpful_voters.push(voter.clone());
        feedback.helpful_votes = feedback.helpful_votes.saturating_add(1);
        self.store.put(&feedback)?;
        debug!(%product, %user, %voter, votes = feedback.helpful_votes, "helpful vote");
        Ok(feedback.helpful_votes)
    }

    /// Visible feedback with a comment, most helpful first and newest first
    /// among equals, at most [`TESTIMONIAL_LIMIT`] of them
    pub fn testimonials(&self) -> Result<Vec<Feedback>, BarterError> {
        let mut picked = self.store.all()?;
        picked.retain(|feedback| feedback.is_visible() && !feedback.comment.trim().is_empty());
        picked.sort_by(|a, b| {
            b.helpful_votes
                .cmp(&a.helpful_votes)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        picked.truncate(TESTIMONIAL_LIMIT);
        Ok(picked)
    }

    /// Visible feedback on a product, most recently updated first
    pub fn visible_feedback(&self, product: &ProductRef) -> Result<Vec<Feedback>, BarterError> {
        let mut visible = self.store.for_product(product)?;
        visible.retain(Feedback::is_visible);
        visible.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(visible)
    }

    pub fn distribution(&self, product: &ProductRef) -> Result<RatingDistribution, BarterError> {
        let mut distribution = RatingDistribution::default();
        let mut sum = 0u64;
        for feedback in self.store.for_product(product)? {
            if !feedback.is_visible() || !(1..=5).contains(&feedback.rating) {
                continue;
            }
            distribution.counts[usize::from(feedback.rating - 1)] += 1;
            distribution.total += 1;
            sum += u64::from(feedback.rating);
        }
        if distribution.total > 0 {
            distribution.average = round2(sum as f64 / distribution.total as f64);
        }
        Ok(distribution)
    }

    pub fn product_summary(&self, product: &ProductRef) -> Result<RatingSummary, BarterError> {
        Ok(self.store.product_summary(product)?)
    }

    /// Last stored vendor aggregate. May lag behind recent feedback by up to
    /// one debounce window.
    pub fn vendor_summary(&self, vendor: &VendorId) -> Result<RatingSummary, BarterError> {
        Ok(self.store.vendor_summary(vendor)?)
    }
}
