use super::barter::BarterStatus;
use super::types::{BarterId, ProductRef};

/// Coarse error categories, used by transports to pick a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    Validation,
    Conflict,
    Internal,
}

/// Errors surfaced by the barter and rating services
#[derive(thiserror::Error, Debug)]
pub enum BarterError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    /// Worded like a missing barter so callers see one message for both;
    /// [`BarterError::kind`] still tells them apart
    #[error("{}", refused_message(.status, .action))]
    InvalidState {
        barter_number: String,
        status: BarterStatus,
        action: &'static str,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error("directory lookup failed: {0}")]
    Directory(anyhow::Error),
    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

fn refused_message(status: &BarterStatus, action: &str) -> String {
    match (status, action) {
        (BarterStatus::Expired, "accepted") => "barter offer has expired".to_owned(),
        _ => format!("barter offer not found or cannot be {action}"),
    }
}

impl BarterError {
    /// A refused status change on the barter numbered `barter_number`
    pub fn transition(barter_number: &str, action: &'static str, err: TransitionError) -> Self {
        BarterError::InvalidState {
            barter_number: barter_number.to_owned(),
            status: err.from,
            action,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BarterError::NotFound(_) => ErrorKind::NotFound,
            BarterError::Forbidden(_) => ErrorKind::Forbidden,
            BarterError::InvalidState { .. } => ErrorKind::InvalidState,
            BarterError::Validation(_) => ErrorKind::Validation,
            BarterError::Conflict(_) => ErrorKind::Conflict,
            BarterError::Storage(_) | BarterError::Directory(_) | BarterError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<StoreError> for BarterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateBarterNumber(_) | StoreError::VersionConflict { .. } => {
                BarterError::Conflict(err.to_string())
            }
            other => BarterError::Storage(other),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one item must be offered")]
    EmptyOffer,
    #[error("counter offer items are required")]
    EmptyCounterOffer,
    #[error("quantity must be at least 1 for {0}")]
    ZeroQuantity(ProductRef),
    #[error("target quantity must be at least 1")]
    ZeroTargetQuantity,
    #[error("unit price for {0} cannot be negative")]
    NegativePrice(ProductRef),
    #[error("this product is not available for barter")]
    BarterUnavailable,
    #[error("cannot create barter offer with yourself")]
    SelfBarter,
    #[error("some offered products do not belong to you")]
    NotOwned,
    #[error("insufficient stock for {product}. available: {available}, requested: {requested}")]
    InsufficientStock {
        product: ProductRef,
        available: u32,
        requested: u32,
    },
    #[error("rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(u8),
    #[error("value arithmetic overflowed")]
    ValueOverflow,
}

/// Rejected status change on a barter
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("illegal barter transition {from} -> {to}")]
pub struct TransitionError {
    pub from: BarterStatus,
    pub to: BarterStatus,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("barter number {0} is already taken")]
    DuplicateBarterNumber(String),
    #[error("barter {id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        id: BarterId,
        expected: u64,
        found: u64,
    },
    #[error("barter {0} does not exist")]
    Missing(BarterId),
}
