use std::io;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::data::meta::COMPRESSION_ZSTD;

/// Decompresses a ZSTD compressed byte array
///
/// # Arguments
///
/// * `compressed_data` - A byte slice that holds the compressed data
///
/// # Returns
///
/// * `decompressed_data` - A vector of u8 that holds the decompressed data
///
pub fn zstd_decompress(compressed_data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(compressed_data)?;
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;
    Ok(decompressed_data)
}

/// Compresses a byte array using ZSTD
///
/// # Arguments
///
/// * `decompressed_data` - A byte slice that holds the decompressed data
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zstd_compress(decompressed_data: &[u8], compression_level: i32) -> io::Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), compression_level)?;
    encoder.write_all(decompressed_data)?;
    let compressed_data = encoder.finish()?;
    Ok(compressed_data)
}

/// Assemble one on-disk block: `[u32 bin_size][u32 n_entries][body]`, where
/// `bin_size` counts the whole block including the 8-byte header and the
/// body is the payload, zstd-compressed when the dataset says so.
pub fn build_block(
    payload: &[u8],
    n_entries: u32,
    compression_type: i64,
    compression_level: i32,
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    let body = if compression_type == COMPRESSION_ZSTD {
        zstd_compress(payload, compression_level)?
    } else {
        payload.to_vec()
    };

    let mut block = Vec::with_capacity(body.len() + 8);
    block.extend_from_slice(&(body.len() as u32 + 8).to_le_bytes());
    block.extend_from_slice(&n_entries.to_le_bytes());
    block.extend_from_slice(&body);

    Ok(block)
}

/// Serialize a particle-id slice into an id-block payload (u64 little-endian).
pub fn build_id_payload(particle_ids: &[u64]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(particle_ids.len() * 8);
    for &id in particle_ids {
        payload.extend_from_slice(&id.to_le_bytes());
    }
    payload
}

/// Serialize birth coordinates into an origin-block payload: the snapshot,
/// subfind and group arrays back-to-back, each i64 little-endian.
pub fn build_origin_payload(
    birth_snap_nums: &[i64],
    birth_subfind_ids: &[i64],
    birth_group_ids: &[i64],
) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity((birth_snap_nums.len() + birth_subfind_ids.len() + birth_group_ids.len()) * 8);
    for array in [birth_snap_nums, birth_subfind_ids, birth_group_ids] {
        for &value in array {
            payload.extend_from_slice(&value.to_le_bytes());
        }
    }
    payload
}

/// Parses an id-block payload
///
/// # Arguments
///
/// * `payload` - the decompressed block body
/// * `n_entries` - the entry count from the block header
///
/// # Returns
///
/// * `particle_ids` - A vector of u64 that holds the member-particle ids
///
pub fn parse_id_payload(
    payload: &[u8],
    n_entries: usize,
) -> Result<Vec<u64>, Box<dyn std::error::Error + Send + Sync>> {
    if payload.len() != n_entries * 8 {
        return Err(format!(
            "id block payload holds {} bytes, expected {} for {} entries",
            payload.len(),
            n_entries * 8,
            n_entries
        )
        .into());
    }

    let mut rdr = Cursor::new(payload);
    let mut particle_ids = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        particle_ids.push(rdr.read_u64::<LittleEndian>()?);
    }
    Ok(particle_ids)
}

/// Parses an origin-block payload
///
/// # Arguments
///
/// * `payload` - the decompressed block body
/// * `n_entries` - the entry count from the block header
///
/// # Returns
///
/// * `birth_snap_nums` - A vector of i64 that holds the birth snapshots
/// * `birth_subfind_ids` - A vector of i64 that holds the birth subhalos
/// * `birth_group_ids` - A vector of i64 that holds the birth FOF groups
///
pub fn parse_origin_payload(
    payload: &[u8],
    n_entries: usize,
) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>), Box<dyn std::error::Error + Send + Sync>> {
    if payload.len() != n_entries * 24 {
        return Err(format!(
            "origin block payload holds {} bytes, expected {} for {} entries",
            payload.len(),
            n_entries * 24,
            n_entries
        )
        .into());
    }

    let mut rdr = Cursor::new(payload);
    let mut birth_snap_nums = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        birth_snap_nums.push(rdr.read_i64::<LittleEndian>()?);
    }
    let mut birth_subfind_ids = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        birth_subfind_ids.push(rdr.read_i64::<LittleEndian>()?);
    }
    let mut birth_group_ids = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        birth_group_ids.push(rdr.read_i64::<LittleEndian>()?);
    }

    Ok((birth_snap_nums, birth_subfind_ids, birth_group_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::COMPRESSION_NONE;

    #[test]
    fn test_id_payload_round_trip() {
        let ids = vec![3u64, 99, 100_000_000_007];
        let payload = build_id_payload(&ids);
        let parsed = parse_id_payload(&payload, ids.len()).unwrap();
        assert_eq!(parsed, ids);
    }

    #[test]
    fn test_origin_payload_round_trip() {
        let snaps = vec![10i64, 33, 98];
        let subfinds = vec![5i64, -1, 7];
        let groups = vec![0i64, 0, 12];
        let payload = build_origin_payload(&snaps, &subfinds, &groups);
        let (s, f, g) = parse_origin_payload(&payload, 3).unwrap();
        assert_eq!(s, snaps);
        assert_eq!(f, subfinds);
        assert_eq!(g, groups);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let payload = build_id_payload(&[1, 2, 3]);
        assert!(parse_id_payload(&payload[..20], 3).is_err());
    }

    #[test]
    fn test_block_header_counts_the_whole_block() {
        let payload = build_id_payload(&[7, 8]);
        let block = build_block(&payload, 2, COMPRESSION_NONE, 0).unwrap();
        assert_eq!(block.len(), payload.len() + 8);
        assert_eq!(u32::from_le_bytes(block[0..4].try_into().unwrap()) as usize, block.len());
        assert_eq!(u32::from_le_bytes(block[4..8].try_into().unwrap()), 2);
    }
}
