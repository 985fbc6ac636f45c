//! Utility functions for identifiers and sled transactions

use bech32::Bech32m;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Human readable request code, e.g. `2025-00042`.
pub fn request_code(year: i32, sequence: u64) -> String {
    format!("{year:04}-{sequence:05}")
}

/// Wrap a typed failure so it aborts the surrounding sled transaction.
pub(crate) fn aborted<E>(err: impl Into<E>) -> ConflictableTransactionError<E> {
    ConflictableTransactionError::Abort(err.into())
}

/// Collapse a transaction outcome back into the caller's error type.
pub(crate) fn settle<T, E>(result: TransactionResult<T, E>) -> Result<T, E>
where
    E: From<sled::Error>,
{
    result.map_err(|err| match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => E::from(e),
    })
}
