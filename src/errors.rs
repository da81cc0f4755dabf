//! Engine Error Definitions
//!
//! Every state-changing entry point is all-or-nothing: an error means the
//! call left no observable mutation. Batched entry points propagate the
//! first error and abort the whole batch.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

use thiserror::Error;

/// Failure modes of the DCA engine's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A token resolved to the zero address (and no wrapped-native is configured).
    #[error("token is the zero address")]
    ZeroAddress,

    /// Deposit or modification amount of zero, or a reduction below zero.
    #[error("invalid amount")]
    InvalidAmount,

    /// Swap count is zero, exceeds the configured maximum, or contradicts the
    /// residual balance during a modification.
    #[error("invalid number of swaps")]
    InvalidNoOfSwaps,

    /// Source and destination tokens are the same.
    #[error("source and destination token must differ")]
    InvalidToken,

    /// One of the tokens is not on the allow-list.
    #[error("token not allowed")]
    UnauthorizedTokens,

    /// The swap interval is not in the allowed set.
    #[error("interval not allowed")]
    InvalidInterval,

    /// `floor(amount / no_of_swaps)` came out zero.
    #[error("per-swap rate is zero")]
    InvalidRate,

    /// A modification that changes neither balance nor schedule.
    #[error("modification changes nothing")]
    NoChanges,

    /// Unknown position id.
    #[error("position {0} does not exist")]
    InvalidPosition(u64),

    /// Caller lacks the role (owner / admin / swap executor) the call requires.
    #[error("caller is not authorized")]
    UnauthorizedCaller,

    /// Swap requested for a pair with no open, funded interval.
    #[error("no swap available for pair")]
    NoAvailableSwap,

    /// Operator-declared input does not match the aggregated input.
    #[error("declared swap amount does not match aggregate")]
    InvalidSwapAmount,

    /// Delivered output below the operator's minimum.
    #[error("delivered amount below minimum")]
    InvalidReturnAmount,

    /// The external trade executor failed.
    #[error("trade execution failed: {0}")]
    SwapCallFailed(String),

    /// Blank swap requested for a triple that has a pending active amount or
    /// nothing deferred.
    #[error("blank swap not applicable")]
    InvalidBlankSwap,

    /// Withdrawal with nothing swapped since the last anchor.
    #[error("nothing swapped to withdraw")]
    ZeroSwappedTokens,

    /// Engine is paused; the operation is disabled until unpause.
    #[error("engine is paused")]
    Paused,

    /// The custody host rejected a transfer.
    #[error("custody operation failed: {0}")]
    Custody(String),
}

impl From<crate::custody::CustodyError> for EngineError {
    fn from(err: crate::custody::CustodyError) -> Self {
        EngineError::Custody(err.to_string())
    }
}

/// Shorthand used across the engine modules.
pub type EngineResult<T> = Result<T, EngineError>;
