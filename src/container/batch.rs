//! Parallel batch encode/decode
//!
//! Each worker thread owns its own session so curve tables are never
//! shared across threads.

use super::decoder::Decoder;
use super::encoder::{EncodedContainer, Encoder};
use crate::config::CodecConfig;
use crate::error::Result;
use rayon::prelude::*;
use tracing::info;

/// Encode independent payloads in parallel; results keep input order
pub fn encode_batch(payloads: &[Vec<u8>], config: &CodecConfig) -> Result<Vec<EncodedContainer>> {
    info!(count = payloads.len(), "Encoding batch");
    payloads
        .par_iter()
        .map_init(
            || Encoder::new(config.clone()),
            |encoder, payload| encoder.encode(payload, None, None),
        )
        .collect()
}

/// Decode independent containers in parallel; results keep input order
pub fn decode_batch(containers: &[Vec<u8>], config: &CodecConfig) -> Result<Vec<Vec<u8>>> {
    info!(count = containers.len(), "Decoding batch");
    containers
        .par_iter()
        .map_init(
            || Decoder::new(config.clone()),
            |decoder, png| decoder.decode(png, None),
        )
        .collect()
}
