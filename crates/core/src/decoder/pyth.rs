//! Pyth push-oracle price accounts.
//!
//! Layout of a version 2 price account (all little-endian):
//!
//! | offset | field                         |
//! |--------|-------------------------------|
//! | 0      | magic `0xa1b2c3d4` (u32)      |
//! | 4      | version `2` (u32)             |
//! | 8      | account type, `3` = price     |
//! | 20     | exponent (i32)                |
//! | 24     | publisher slots / quoters     |
//! | 32     | last slot, valid slot (u64)   |
//! | 48     | EMA price, EMA confidence     |
//! | 96     | publish timestamp (i64)       |
//! | 112    | product account, next account |
//! | 176    | previous aggregate            |
//! | 208    | aggregate price info          |

use oracle_sync_types::{Address, OracleSource};

use super::{check_header, AccountDecoder, FeedStatus, PriceRecord, DISCRIMINATOR_LEN};
use crate::error::{LayoutError, OracleError, Result};

pub const MAGIC: u32 = 0xa1b2_c3d4;
pub const VERSION: u32 = 2;
pub const ACCOUNT_TYPE_PRICE: u32 = 3;

/// Magic followed by version, both little-endian.
pub const DISCRIMINATOR: [u8; DISCRIMINATOR_LEN] = [0xd4, 0xc3, 0xb2, 0xa1, 0x02, 0x00, 0x00, 0x00];

/// Largest exponent magnitude the program accepts.
pub const MAX_EXPONENT: i32 = 32;

pub(crate) const ACCOUNT_TYPE_OFFSET: usize = 8;
pub(crate) const EXPONENT_OFFSET: usize = 20;
pub(crate) const NUM_PUBLISHERS_OFFSET: usize = 24;
pub(crate) const NUM_QUOTERS_OFFSET: usize = 28;
pub(crate) const LAST_SLOT_OFFSET: usize = 32;
pub(crate) const VALID_SLOT_OFFSET: usize = 40;
pub(crate) const EMA_PRICE_OFFSET: usize = 48;
pub(crate) const EMA_CONF_OFFSET: usize = 72;
pub(crate) const TIMESTAMP_OFFSET: usize = 96;
pub(crate) const PRODUCT_OFFSET: usize = 112;
pub(crate) const NEXT_OFFSET: usize = 144;
pub(crate) const PREV_SLOT_OFFSET: usize = 176;
pub(crate) const PREV_PRICE_OFFSET: usize = 184;
pub(crate) const PREV_CONF_OFFSET: usize = 192;
pub(crate) const PREV_TIMESTAMP_OFFSET: usize = 200;
pub(crate) const AGG_PRICE_OFFSET: usize = 208;
pub(crate) const AGG_CONF_OFFSET: usize = 216;
pub(crate) const AGG_STATUS_OFFSET: usize = 224;
pub(crate) const AGG_CORP_ACT_OFFSET: usize = 228;
pub(crate) const AGG_PUB_SLOT_OFFSET: usize = 232;

/// Bytes up to the end of the aggregate price info.
pub const MIN_LEN: usize = 240;

/// Aggregate (or previous aggregate) price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceInfo {
    pub price: i64,
    pub conf: u64,
    pub status: FeedStatus,
    pub corp_act: u32,
    pub pub_slot: u64,
}

/// The fields of a Pyth price account the service reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythPriceAccount {
    pub exponent: i32,
    pub num_publishers: u32,
    pub num_quoters: u32,
    pub last_slot: u64,
    pub valid_slot: u64,
    pub ema_price: i64,
    pub ema_conf: i64,
    pub timestamp: i64,
    pub product: Address,
    pub next: Address,
    pub prev_slot: u64,
    pub prev_price: i64,
    pub prev_conf: u64,
    pub prev_timestamp: i64,
    pub agg: PriceInfo,
}

impl FeedStatus {
    pub(crate) fn from_pyth(raw: u32) -> Self {
        match raw {
            1 => FeedStatus::Trading,
            2 => FeedStatus::Halted,
            3 => FeedStatus::Auction,
            4 => FeedStatus::Ignored,
            _ => FeedStatus::Unknown,
        }
    }

    #[cfg(test)]
    pub(crate) fn to_pyth(self) -> u32 {
        match self {
            FeedStatus::Unknown => 0,
            FeedStatus::Trading => 1,
            FeedStatus::Halted => 2,
            FeedStatus::Auction => 3,
            FeedStatus::Ignored => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PythDecoder;

impl PythDecoder {
    /// Decode the full price account.
    pub fn decode_account(&self, data: &[u8]) -> Result<PythPriceAccount> {
        let r = check_header(self, data)?;

        let account_type = r.u32(ACCOUNT_TYPE_OFFSET)?;
        if account_type != ACCOUNT_TYPE_PRICE {
            return Err(OracleError::parse(
                "pyth account type",
                LayoutError::InvalidValue {
                    field: "account_type",
                    value: account_type.into(),
                },
            ));
        }

        let exponent = r.i32(EXPONENT_OFFSET)?;
        if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
            return Err(OracleError::parse(
                "pyth exponent",
                LayoutError::InvalidValue {
                    field: "exponent",
                    value: exponent.into(),
                },
            ));
        }

        Ok(PythPriceAccount {
            exponent,
            num_publishers: r.u32(NUM_PUBLISHERS_OFFSET)?,
            num_quoters: r.u32(NUM_QUOTERS_OFFSET)?,
            last_slot: r.u64(LAST_SLOT_OFFSET)?,
            valid_slot: r.u64(VALID_SLOT_OFFSET)?,
            ema_price: r.i64(EMA_PRICE_OFFSET)?,
            ema_conf: r.i64(EMA_CONF_OFFSET)?,
            timestamp: r.i64(TIMESTAMP_OFFSET)?,
            product: r.address(PRODUCT_OFFSET)?,
            next: r.address(NEXT_OFFSET)?,
            prev_slot: r.u64(PREV_SLOT_OFFSET)?,
            prev_price: r.i64(PREV_PRICE_OFFSET)?,
            prev_conf: r.u64(PREV_CONF_OFFSET)?,
            prev_timestamp: r.i64(PREV_TIMESTAMP_OFFSET)?,
            agg: PriceInfo {
                price: r.i64(AGG_PRICE_OFFSET)?,
                conf: r.u64(AGG_CONF_OFFSET)?,
                status: FeedStatus::from_pyth(r.u32(AGG_STATUS_OFFSET)?),
                corp_act: r.u32(AGG_CORP_ACT_OFFSET)?,
                pub_slot: r.u64(AGG_PUB_SLOT_OFFSET)?,
            },
        })
    }
}

impl AccountDecoder for PythDecoder {
    fn source(&self) -> OracleSource {
        OracleSource::Pyth
    }

    fn discriminator(&self) -> [u8; DISCRIMINATOR_LEN] {
        DISCRIMINATOR
    }

    fn min_len(&self) -> usize {
        MIN_LEN
    }

    fn decode(&self, data: &[u8]) -> Result<PriceRecord> {
        let account = self.decode_account(data)?;
        Ok(PriceRecord {
            source: OracleSource::Pyth,
            mantissa: account.agg.price.into(),
            confidence: account.agg.conf.into(),
            exponent: account.exponent,
            publish_time: account.timestamp,
            slot: account.agg.pub_slot,
            status: account.agg.status,
        })
    }
}
