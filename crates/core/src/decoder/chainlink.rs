//! Chainlink OCR2 store feeds (`Transmissions` accounts).
//!
//! The account is a fixed header followed by a ring buffer of transmissions.
//! The program publishes no confidence interval, so records report `0`.

use oracle_sync_types::{Address, OracleSource};

use super::{check_header, AccountDecoder, FeedStatus, PriceRecord, DISCRIMINATOR_LEN};
use crate::error::{LayoutError, OracleError, Result};

/// Anchor discriminator of `Transmissions`.
pub const DISCRIMINATOR: [u8; DISCRIMINATOR_LEN] = [96, 179, 69, 66, 128, 129, 73, 117];

pub(crate) const VERSION_OFFSET: usize = 8;
pub(crate) const STATE_OFFSET: usize = 9;
pub(crate) const OWNER_OFFSET: usize = 10;
pub(crate) const WRITER_OFFSET: usize = 74;
pub(crate) const DESCRIPTION_OFFSET: usize = 106;
pub(crate) const DESCRIPTION_LEN: usize = 32;
pub(crate) const DECIMALS_OFFSET: usize = 138;
pub(crate) const LATEST_ROUND_ID_OFFSET: usize = 143;
pub(crate) const LIVE_LENGTH_OFFSET: usize = 148;
pub(crate) const LIVE_CURSOR_OFFSET: usize = 152;

/// Discriminator plus the reserved 192-byte header.
pub const HEADER_END: usize = 200;
pub const TRANSMISSION_LEN: usize = 48;

pub(crate) const TX_SLOT: usize = 0;
pub(crate) const TX_TIMESTAMP: usize = 8;
pub(crate) const TX_ANSWER: usize = 16;

/// Header plus at least one ring entry.
pub const MIN_LEN: usize = HEADER_END + TRANSMISSION_LEN;

/// One reported answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub slot: u64,
    pub timestamp: u32,
    pub answer: i128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFeed {
    pub version: u8,
    pub state: u8,
    pub owner: Address,
    pub writer: Address,
    pub description: String,
    pub decimals: u8,
    pub latest_round_id: u32,
    pub live_length: u32,
    pub live_cursor: u32,
    pub latest: Transmission,
}

/// Ring index of the newest transmission.
pub fn latest_index(live_cursor: u32, live_length: u32) -> Option<u32> {
    if live_length == 0 {
        return None;
    }
    let cursor = u64::from(live_cursor % live_length);
    let length = u64::from(live_length);
    // strictly less than live_length, so it fits back into u32
    Some(((cursor + length - 1) % length) as u32)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChainlinkDecoder;

impl ChainlinkDecoder {
    pub fn decode_feed(&self, data: &[u8]) -> Result<StoreFeed> {
        let r = check_header(self, data)?;

        let live_length = r.u32(LIVE_LENGTH_OFFSET)?;
        let live_cursor = r.u32(LIVE_CURSOR_OFFSET)?;
        let capacity = data.len().saturating_sub(HEADER_END) / TRANSMISSION_LEN;
        if live_length as usize > capacity {
            return Err(OracleError::parse(
                "chainlink ring buffer",
                LayoutError::InvalidValue {
                    field: "live_length",
                    value: live_length.into(),
                },
            ));
        }
        let index = latest_index(live_cursor, live_length).ok_or_else(|| {
            OracleError::parse(
                "chainlink ring buffer",
                LayoutError::InvalidValue {
                    field: "live_length",
                    value: 0,
                },
            )
        })?;

        let entry = HEADER_END + index as usize * TRANSMISSION_LEN;
        let latest = Transmission {
            slot: r.u64(entry + TX_SLOT)?,
            timestamp: r.u32(entry + TX_TIMESTAMP)?,
            answer: r.i128(entry + TX_ANSWER)?,
        };

        Ok(StoreFeed {
            version: r.u8(VERSION_OFFSET)?,
            state: r.u8(STATE_OFFSET)?,
            owner: r.address(OWNER_OFFSET)?,
            writer: r.address(WRITER_OFFSET)?,
            description: r.label(DESCRIPTION_OFFSET, DESCRIPTION_LEN)?,
            decimals: r.u8(DECIMALS_OFFSET)?,
            latest_round_id: r.u32(LATEST_ROUND_ID_OFFSET)?,
            live_length,
            live_cursor,
            latest,
        })
    }
}

impl AccountDecoder for ChainlinkDecoder {
    fn source(&self) -> OracleSource {
        OracleSource::Chainlink
    }

    fn discriminator(&self) -> [u8; DISCRIMINATOR_LEN] {
        DISCRIMINATOR
    }

    fn min_len(&self) -> usize {
        MIN_LEN
    }

    fn decode(&self, data: &[u8]) -> Result<PriceRecord> {
        let feed = self.decode_feed(data)?;
        let status = if feed.latest_round_id == 0 {
            FeedStatus::Unknown
        } else {
            FeedStatus::Trading
        };

        Ok(PriceRecord {
            source: OracleSource::Chainlink,
            mantissa: feed.latest.answer,
            confidence: 0,
            exponent: -i32::from(feed.decimals),
            publish_time: feed.latest.timestamp.into(),
            slot: feed.latest.slot,
            status,
        })
    }
}
