//! Switchboard V2 aggregator accounts.
//!
//! Only the header fields and the latest confirmed round are read. Decimal
//! values are stored as an `i128` mantissa followed by a `u32` scale, where
//! `value = mantissa / 10^scale`.

use oracle_sync_types::{Address, OracleSource};

use super::{
    check_header, reader::AccountReader, AccountDecoder, FeedStatus, PriceRecord,
    DISCRIMINATOR_LEN,
};
use crate::error::{LayoutError, OracleError, Result};

/// Anchor discriminator of `AggregatorAccountData`.
pub const DISCRIMINATOR: [u8; DISCRIMINATOR_LEN] = [217, 230, 65, 101, 201, 162, 27, 125];

/// Switchboard decimals never carry more than 28 fractional digits.
pub const MAX_SCALE: u32 = 28;

pub(crate) const NAME_OFFSET: usize = 8;
pub(crate) const NAME_LEN: usize = 32;
pub(crate) const QUEUE_OFFSET: usize = 200;
// after oracle_request_batch_size u32@232
pub(crate) const MIN_ORACLE_RESULTS_OFFSET: usize = 236;
pub(crate) const LATEST_ROUND_OFFSET: usize = 341;

// Offsets inside the round.
pub(crate) const ROUND_NUM_SUCCESS: usize = 0;
pub(crate) const ROUND_NUM_ERROR: usize = 4;
pub(crate) const ROUND_IS_CLOSED: usize = 8;
pub(crate) const ROUND_OPEN_SLOT: usize = 9;
pub(crate) const ROUND_OPEN_TIMESTAMP: usize = 17;
pub(crate) const ROUND_RESULT: usize = 25;
pub(crate) const ROUND_STD_DEVIATION: usize = 45;
pub(crate) const ROUND_MIN_RESPONSE: usize = 65;
pub(crate) const ROUND_MAX_RESPONSE: usize = 85;

/// Encoded size of one decimal.
pub const DECIMAL_LEN: usize = 20;

/// Bytes up to the end of the round's max response.
pub const MIN_LEN: usize = LATEST_ROUND_OFFSET + ROUND_MAX_RESPONSE + DECIMAL_LEN;

/// Fixed-point decimal as stored by the aggregator program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchboardDecimal {
    pub mantissa: i128,
    pub scale: u32,
}

impl SwitchboardDecimal {
    pub fn exponent(&self) -> i32 {
        // scale is bounded by MAX_SCALE when read
        -(self.scale as i32)
    }

    /// Mantissa re-expressed at a different (larger or equal) scale.
    pub fn mantissa_at_scale(&self, scale: u32) -> Option<i128> {
        let shift = scale.checked_sub(self.scale)?;
        10i128
            .checked_pow(shift)
            .and_then(|factor| self.mantissa.checked_mul(factor))
    }

    fn read(reader: &AccountReader<'_>, offset: usize) -> Result<Self> {
        let mantissa = reader.i128(offset)?;
        let scale = reader.u32(offset + 16)?;
        if scale > MAX_SCALE {
            return Err(OracleError::parse(
                "switchboard decimal",
                LayoutError::InvalidValue {
                    field: "scale",
                    value: scale.into(),
                },
            ));
        }
        Ok(Self { mantissa, scale })
    }
}

/// The latest round the aggregator's oracles agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorRound {
    pub num_success: u32,
    pub num_error: u32,
    pub is_closed: bool,
    pub round_open_slot: u64,
    pub round_open_timestamp: i64,
    pub result: SwitchboardDecimal,
    pub std_deviation: SwitchboardDecimal,
    pub min_response: SwitchboardDecimal,
    pub max_response: SwitchboardDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorAccount {
    pub name: String,
    pub queue: Address,
    pub min_oracle_results: u32,
    pub latest_confirmed_round: AggregatorRound,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchboardDecoder;

impl SwitchboardDecoder {
    pub fn decode_account(&self, data: &[u8]) -> Result<AggregatorAccount> {
        let r = check_header(self, data)?;
        let round = LATEST_ROUND_OFFSET;

        Ok(AggregatorAccount {
            name: r.label(NAME_OFFSET, NAME_LEN)?,
            queue: r.address(QUEUE_OFFSET)?,
            min_oracle_results: r.u32(MIN_ORACLE_RESULTS_OFFSET)?,
            latest_confirmed_round: AggregatorRound {
                num_success: r.u32(round + ROUND_NUM_SUCCESS)?,
                num_error: r.u32(round + ROUND_NUM_ERROR)?,
                is_closed: r.u8(round + ROUND_IS_CLOSED)? != 0,
                round_open_slot: r.u64(round + ROUND_OPEN_SLOT)?,
                round_open_timestamp: r.i64(round + ROUND_OPEN_TIMESTAMP)?,
                result: SwitchboardDecimal::read(&r, round + ROUND_RESULT)?,
                std_deviation: SwitchboardDecimal::read(&r, round + ROUND_STD_DEVIATION)?,
                min_response: SwitchboardDecimal::read(&r, round + ROUND_MIN_RESPONSE)?,
                max_response: SwitchboardDecimal::read(&r, round + ROUND_MAX_RESPONSE)?,
            },
        })
    }
}

impl AccountDecoder for SwitchboardDecoder {
    fn source(&self) -> OracleSource {
        OracleSource::Switchboard
    }

    fn discriminator(&self) -> [u8; DISCRIMINATOR_LEN] {
        DISCRIMINATOR
    }

    fn min_len(&self) -> usize {
        MIN_LEN
    }

    fn decode(&self, data: &[u8]) -> Result<PriceRecord> {
        let round = self.decode_account(data)?.latest_confirmed_round;

        // Express result and deviation with a shared exponent.
        let scale = round.result.scale.max(round.std_deviation.scale);
        let overflow = |field: &'static str| {
            OracleError::parse(
                "switchboard round",
                LayoutError::InvalidValue {
                    field,
                    value: round.result.mantissa,
                },
            )
        };
        let mantissa = round
            .result
            .mantissa_at_scale(scale)
            .ok_or_else(|| overflow("result"))?;
        let confidence = round
            .std_deviation
            .mantissa_at_scale(scale)
            .ok_or_else(|| overflow("std_deviation"))?
            .unsigned_abs();

        let status = if round.num_success == 0 {
            FeedStatus::Unknown
        } else {
            FeedStatus::Trading
        };

        Ok(PriceRecord {
            source: OracleSource::Switchboard,
            mantissa,
            confidence,
            exponent: -(scale as i32),
            publish_time: round.round_open_timestamp,
            slot: round.round_open_slot,
            status,
        })
    }
}
