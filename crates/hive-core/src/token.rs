//! Allocation tokens: the handle returned by every storage claim.
//!
//! A token starts [`Pending`](TokenState::Pending) and is finalized exactly
//! once, either [`fulfill`](AllocationToken::fulfill)ed (the claim becomes a
//! physical stock change) or [`cancel`](AllocationToken::cancel)led (the claim
//! is released and stock is untouched). Finalizing an already-finalized token
//! is a no-op.
//!
//! A token must be finalized by its owner before the owner is discarded.
//! Dropping a pending token leaks the claimed capacity; this is reported as a
//! warning because it always indicates a bookkeeping bug.

use crate::id::{GoodType, StorageId};
use crate::storage::{Goods, Storage, StorageError};

/// What a token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    /// Units claimed for removal. Fulfilling decrements `present`.
    Reservation,
    /// Room claimed for incoming units. Fulfilling increments `present`.
    Allocation,
}

/// Lifecycle state of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    Pending,
    Fulfilled,
    Cancelled,
}

/// The part of a claim that landed in one storage cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
    pub(crate) cell: usize,
    pub(crate) good: GoodType,
    pub(crate) quantity: u32,
}

/// A pending reservation or allocation against one [`Storage`].
///
/// Deliberately not `Clone`: a copy could be finalized twice.
#[derive(Debug)]
#[must_use = "an allocation token must be fulfilled or cancelled"]
pub struct AllocationToken {
    storage: StorageId,
    kind: ClaimKind,
    claims: Vec<Claim>,
    state: TokenState,
    reason: String,
}

impl AllocationToken {
    pub(crate) fn new(
        storage: StorageId,
        kind: ClaimKind,
        claims: Vec<Claim>,
        reason: String,
    ) -> Self {
        Self {
            storage,
            kind,
            claims,
            state: TokenState::Pending,
            reason,
        }
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == TokenState::Pending
    }

    pub fn kind(&self) -> ClaimKind {
        self.kind
    }

    /// The storage that issued this token.
    pub fn storage(&self) -> StorageId {
        self.storage
    }

    /// Diagnostic payload supplied by the caller. Never interpreted.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub(crate) fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// The claimed goods, summed across cells.
    pub fn goods(&self) -> Goods {
        let mut goods = Goods::new();
        for claim in &self.claims {
            *goods.entry(claim.good).or_insert(0) += claim.quantity;
        }
        goods
    }

    /// Commit the claim. No-op if the token is already finalized.
    pub fn fulfill(&mut self, storage: &mut Storage) -> Result<(), StorageError> {
        if !self.is_pending() {
            return Ok(());
        }
        self.check_owner(storage)?;
        storage.commit(self.kind, &self.claims);
        self.state = TokenState::Fulfilled;
        Ok(())
    }

    /// Release the claim without touching stock. No-op if already finalized.
    pub fn cancel(&mut self, storage: &mut Storage) -> Result<(), StorageError> {
        if !self.is_pending() {
            return Ok(());
        }
        self.check_owner(storage)?;
        storage.revert(self.kind, &self.claims);
        self.state = TokenState::Cancelled;
        Ok(())
    }

    /// Mark the token cancelled without touching any storage. Used when the
    /// issuing storage has already been destroyed along with its claims.
    pub(crate) fn abandon(&mut self) {
        if self.is_pending() {
            self.state = TokenState::Cancelled;
        }
    }

    fn check_owner(&self, storage: &Storage) -> Result<(), StorageError> {
        if storage.id() != self.storage {
            return Err(StorageError::ForeignToken {
                token_storage: self.storage,
                storage: storage.id(),
            });
        }
        Ok(())
    }
}

impl Drop for AllocationToken {
    fn drop(&mut self) {
        if self.is_pending() && !std::thread::panicking() {
            tracing::warn!(
                storage = ?self.storage,
                kind = ?self.kind,
                goods = ?self.goods(),
                reason = %self.reason,
                "allocation token dropped while pending; claimed capacity leaked"
            );
        }
    }
}
