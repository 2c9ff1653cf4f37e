//! Account decoders for the supported oracle programs.
//!
//! Each program publishes prices in a fixed binary layout behind an 8-byte
//! discriminator. Decoders validate the discriminator, read fields at
//! constant offsets through [`AccountReader`] and return a [`PriceRecord`]
//! holding the raw fixed-point values.

pub mod chainlink;
pub mod pyth;
pub mod reader;
pub mod switchboard;

use std::sync::Arc;

use oracle_sync_types::OracleSource;
use serde::{Deserialize, Serialize};

use crate::error::{OracleError, Result};

pub use chainlink::ChainlinkDecoder;
pub use pyth::PythDecoder;
pub use reader::AccountReader;
pub use switchboard::SwitchboardDecoder;

/// Length of the leading account discriminator.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Trading status of a decoded price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Unknown,
    Trading,
    Halted,
    Auction,
    Ignored,
}

impl FeedStatus {
    pub fn is_trading(&self) -> bool {
        matches!(self, FeedStatus::Trading)
    }
}

/// Program-independent view of a decoded price account.
///
/// `mantissa` and `confidence` are fixed-point values sharing `exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRecord {
    pub source: OracleSource,
    pub mantissa: i128,
    pub confidence: u128,
    pub exponent: i32,
    /// Unix seconds; `0` when the program did not record a publish time.
    pub publish_time: i64,
    pub slot: u64,
    pub status: FeedStatus,
}

impl PriceRecord {
    pub fn price(&self) -> f64 {
        scale(self.mantissa, self.exponent)
    }

    pub fn confidence(&self) -> f64 {
        scale_unsigned(self.confidence, self.exponent)
    }

    /// Decimal places implied by the exponent (`0` for non-negative exponents).
    pub fn decimals(&self) -> u8 {
        u8::try_from(self.exponent.saturating_neg().max(0)).unwrap_or(u8::MAX)
    }
}

/// Decodes one program's price account layout.
pub trait AccountDecoder: Send + Sync {
    fn source(&self) -> OracleSource;

    fn discriminator(&self) -> [u8; DISCRIMINATOR_LEN];

    /// Smallest buffer the layout can be read from.
    fn min_len(&self) -> usize;

    fn decode(&self, data: &[u8]) -> Result<PriceRecord>;
}

/// Resolve the decoder for a program.
pub fn decoder_for(source: OracleSource) -> Arc<dyn AccountDecoder> {
    match source {
        OracleSource::Pyth => Arc::new(PythDecoder),
        OracleSource::Chainlink => Arc::new(ChainlinkDecoder),
        OracleSource::Switchboard => Arc::new(SwitchboardDecoder),
    }
}

/// Shared header validation: discriminator first, then layout length.
pub(crate) fn check_header<'a>(
    decoder: &dyn AccountDecoder,
    data: &'a [u8],
) -> Result<AccountReader<'a>> {
    let reader = AccountReader::new(data);
    let found: [u8; DISCRIMINATOR_LEN] = reader
        .array(0)
        .map_err(|e| OracleError::parse(format!("{} discriminator", decoder.source()), e))?;

    if found != decoder.discriminator() {
        return Err(OracleError::InvalidAccount {
            expected: decoder.source(),
            found,
        });
    }

    reader
        .require(decoder.min_len())
        .map_err(|e| OracleError::parse(format!("{} account", decoder.source()), e))?;

    Ok(reader)
}

/// `mantissa * 10^exponent` as a float.
///
/// Negative exponents divide by an exact power of ten so values such as
/// `345000000000e-8` land exactly on `3450.0`.
pub fn scale(mantissa: i128, exponent: i32) -> f64 {
    let magnitude = 10f64.powi(exponent.saturating_abs());
    if exponent < 0 {
        mantissa as f64 / magnitude
    } else {
        mantissa as f64 * magnitude
    }
}

pub fn scale_unsigned(mantissa: u128, exponent: i32) -> f64 {
    let magnitude = 10f64.powi(exponent.saturating_abs());
    if exponent < 0 {
        mantissa as f64 / magnitude
    } else {
        mantissa as f64 * magnitude
    }
}
