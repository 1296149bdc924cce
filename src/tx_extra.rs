//! Coinbase-extra TLV codec.
//!
//! The coinbase carries a free-form byte array of tagged entries: one tag
//! byte, a varint payload length, then the payload. The leader subsystem
//! stores its `(leader_id, signature)` pair under
//! [`TX_EXTRA_TAG_LEADER_INFO`]; the template builder uses the pubkey, nonce
//! and padding tags.
//!
//! The decoder runs on hostile input at the consensus boundary: it must not
//! read out of bounds, must not allocate more than the input it was handed,
//! and must fail cleanly on truncation. Address validity is the validator's
//! concern, not this module's; empty and oversized ids are
//! serialization-legal here.

use ed25519_dalek::SIGNATURE_LENGTH;

use crate::errors::{ChainError, ChainResult};

pub const TX_EXTRA_TAG_PADDING: u8 = 0x00;
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_TAG_NONCE: u8 = 0x02;
pub const TX_EXTRA_TAG_LEADER_INFO: u8 = 0x05;

pub const TX_EXTRA_NONCE_MAX_SIZE: usize = 255;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Read a LEB128 varint at `pos`, advancing it. The decoded value is capped
/// at the number of bytes remaining after the varint itself, which bounds
/// every downstream slice and allocation by the input length.
fn read_length(data: &[u8], pos: &mut usize) -> Option<usize> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        if shift >= 63 && byte > 1 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    let length = usize::try_from(value).ok()?;
    if length > data.len() - *pos {
        return None;
    }
    Some(length)
}

struct RawEntry {
    tag: u8,
    start: usize,
    payload_start: usize,
    end: usize,
}

/// Parse the entry beginning at `pos`. `None` means the stream is malformed
/// or truncated from this point on.
fn next_entry(extra: &[u8], pos: &mut usize) -> Option<RawEntry> {
    let start = *pos;
    let tag = *extra.get(*pos)?;
    *pos += 1;
    let length = read_length(extra, pos)?;
    let payload_start = *pos;
    *pos += length;
    Some(RawEntry {
        tag,
        start,
        payload_start,
        end: *pos,
    })
}

fn split_leader_payload(payload: &[u8]) -> Option<(Vec<u8>, [u8; SIGNATURE_LENGTH])> {
    let mut pos = 0usize;
    let id_len = read_length(payload, &mut pos)?;
    let id = payload.get(pos..pos + id_len)?;
    let rest = &payload[pos + id_len..];
    if rest.len() != SIGNATURE_LENGTH {
        return None;
    }
    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature.copy_from_slice(rest);
    Some((id.to_vec(), signature))
}

/// Append a leader-info entry. Always appends a fresh entry at the end;
/// existing entries, including prior leader-info ones, are left alone.
pub fn add_leader_info(extra: &mut Vec<u8>, leader_id: &[u8], signature: &[u8; SIGNATURE_LENGTH]) {
    let mut payload = Vec::with_capacity(leader_id.len() + SIGNATURE_LENGTH + 4);
    write_varint(&mut payload, leader_id.len() as u64);
    payload.extend_from_slice(leader_id);
    payload.extend_from_slice(signature);

    extra.push(TX_EXTRA_TAG_LEADER_INFO);
    write_varint(extra, payload.len() as u64);
    extra.extend_from_slice(&payload);
}

/// Scan left to right and return the first leader-info entry, or `None` if
/// the stream holds none or turns malformed before one is found.
pub fn get_leader_info(extra: &[u8]) -> Option<(Vec<u8>, [u8; SIGNATURE_LENGTH])> {
    let mut pos = 0usize;
    while pos < extra.len() {
        let entry = next_entry(extra, &mut pos)?;
        if entry.tag == TX_EXTRA_TAG_LEADER_INFO {
            return split_leader_payload(&extra[entry.payload_start..entry.end]);
        }
    }
    None
}

/// Remove the first leader-info entry, preserving the relative order of all
/// other bytes. `None` if no such entry exists.
pub fn remove_leader_info(extra: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0usize;
    while pos < extra.len() {
        let entry = next_entry(extra, &mut pos)?;
        if entry.tag == TX_EXTRA_TAG_LEADER_INFO {
            // The first leader-tagged entry is authoritative, exactly as in
            // `get_leader_info`; an undecodable payload means no entry.
            split_leader_payload(&extra[entry.payload_start..entry.end])?;
            let mut stripped = Vec::with_capacity(extra.len() - (entry.end - entry.start));
            stripped.extend_from_slice(&extra[..entry.start]);
            stripped.extend_from_slice(&extra[entry.end..]);
            return Some(stripped);
        }
    }
    None
}

/// Drop the extra-nonce and padding entries the template builder inserted,
/// leaving every other entry in place. This yields the byte image the leader
/// signs and the validator reconstructs.
pub fn strip_template_entries(extra: &[u8]) -> ChainResult<Vec<u8>> {
    let mut stripped = Vec::with_capacity(extra.len());
    let mut pos = 0usize;
    while pos < extra.len() {
        let entry = next_entry(extra, &mut pos)
            .ok_or_else(|| ChainError::Consensus("malformed coinbase extra in template".into()))?;
        if entry.tag == TX_EXTRA_TAG_NONCE || entry.tag == TX_EXTRA_TAG_PADDING {
            continue;
        }
        stripped.extend_from_slice(&extra[entry.start..entry.end]);
    }
    Ok(stripped)
}

pub fn add_tx_pub_key(extra: &mut Vec<u8>, pubkey: &[u8; 32]) {
    extra.push(TX_EXTRA_TAG_PUBKEY);
    write_varint(extra, 32);
    extra.extend_from_slice(pubkey);
}

pub fn add_extra_nonce(extra: &mut Vec<u8>, nonce: &[u8]) -> ChainResult<()> {
    if nonce.len() > TX_EXTRA_NONCE_MAX_SIZE {
        return Err(ChainError::Consensus(format!(
            "extra nonce of {} bytes exceeds the {TX_EXTRA_NONCE_MAX_SIZE}-byte cap",
            nonce.len()
        )));
    }
    extra.push(TX_EXTRA_TAG_NONCE);
    write_varint(extra, nonce.len() as u64);
    extra.extend_from_slice(nonce);
    Ok(())
}

pub fn add_padding(extra: &mut Vec<u8>, len: usize) {
    extra.push(TX_EXTRA_TAG_PADDING);
    write_varint(extra, len as u64);
    extra.extend(std::iter::repeat(0u8).take(len));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VALID_LEADER_ID: &str = "XCA1a2b3c4d5e6f7g8h9i0j1k2l3m4n5o6p7q8r9s0t1u2v3w4x5y6z7A8B9C0D1E2F3G4H5I6J7K8L9M0N1O2P3Q4R5S6";

    fn valid_signature() -> [u8; SIGNATURE_LENGTH] {
        [0xAB; SIGNATURE_LENGTH]
    }

    #[test]
    fn round_trips_valid_metadata() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        assert!(!extra.is_empty());
        // Tag + two varints + the id + 64 signature bytes.
        assert!(extra.len() >= 103 && extra.len() <= 170, "len={}", extra.len());

        let (id, sig) = get_leader_info(&extra).expect("entry extracts");
        assert_eq!(id, VALID_LEADER_ID.as_bytes());
        assert_eq!(sig, valid_signature());
    }

    #[test]
    fn empty_extra_yields_none() {
        assert!(get_leader_info(&[]).is_none());
        assert!(remove_leader_info(&[]).is_none());
    }

    #[test]
    fn truncated_header_yields_none() {
        assert!(get_leader_info(&[TX_EXTRA_TAG_LEADER_INFO]).is_none());
    }

    #[test]
    fn wrong_tag_yields_none() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        extra[0] = 0xFF;
        assert!(get_leader_info(&extra).is_none());
    }

    #[test]
    fn corrupted_length_yields_none() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        extra[1] = 0xFF;
        assert!(get_leader_info(&extra).is_none());
    }

    #[test]
    fn truncated_payload_yields_none() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        extra.truncate(extra.len() - 30);
        assert!(get_leader_info(&extra).is_none());
    }

    #[test]
    fn empty_leader_id_is_serialization_legal() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, b"", &valid_signature());
        let (id, sig) = get_leader_info(&extra).expect("empty id still extracts");
        assert!(id.is_empty());
        assert_eq!(sig, valid_signature());
    }

    #[test]
    fn oversized_leader_id_round_trips() {
        let oversized = vec![b'X'; 10_000];
        let mut extra = Vec::new();
        add_leader_info(&mut extra, &oversized, &valid_signature());
        let (id, _) = get_leader_info(&extra).expect("oversized id extracts");
        assert_eq!(id, oversized);
    }

    #[test]
    fn corrupted_signature_bytes_still_parse() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        let len = extra.len();
        for byte in &mut extra[len - SIGNATURE_LENGTH..] {
            *byte ^= 0xFF;
        }
        let (id, sig) = get_leader_info(&extra).expect("corruption surfaces at verify time");
        assert_eq!(id, VALID_LEADER_ID.as_bytes());
        assert_eq!(sig, [0x54; SIGNATURE_LENGTH]);
    }

    #[test]
    fn leader_info_found_among_other_entries() {
        let mut extra = Vec::new();
        add_tx_pub_key(&mut extra, &[0x12; 32]);
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        add_padding(&mut extra, 10);

        let (id, sig) = get_leader_info(&extra).expect("entry found mid-stream");
        assert_eq!(id, VALID_LEADER_ID.as_bytes());
        assert_eq!(sig, valid_signature());
    }

    #[test]
    fn garbage_bytes_fail_cleanly() {
        // The walk turns malformed partway through this buffer.
        let garbage: Vec<u8> = (0..100).map(|i| (i * 37 + 251) as u8).collect();
        assert!(get_leader_info(&garbage).is_none());
    }

    #[test]
    fn non_printable_leader_id_round_trips() {
        let id = b"XCA\x00\x01\x02\x03\x04\x05invalid";
        let mut extra = Vec::new();
        add_leader_info(&mut extra, id, &valid_signature());
        let (parsed, _) = get_leader_info(&extra).expect("control characters are legal");
        assert_eq!(parsed, id);
    }

    #[test]
    fn remove_preserves_surrounding_entries() {
        let mut extra = Vec::new();
        add_tx_pub_key(&mut extra, &[0x12; 32]);
        let mut expected = extra.clone();
        add_leader_info(&mut extra, VALID_LEADER_ID.as_bytes(), &valid_signature());
        add_padding(&mut extra, 4);
        add_padding(&mut expected, 4);

        let stripped = remove_leader_info(&extra).expect("entry removed");
        assert_eq!(stripped, expected);
        assert!(remove_leader_info(&stripped).is_none());
    }

    #[test]
    fn first_of_two_leader_entries_wins() {
        let mut extra = Vec::new();
        add_leader_info(&mut extra, b"first", &valid_signature());
        add_leader_info(&mut extra, b"second", &[0x11; SIGNATURE_LENGTH]);

        let (id, _) = get_leader_info(&extra).expect("first entry wins");
        assert_eq!(id, b"first");

        let stripped = remove_leader_info(&extra).expect("first entry removed");
        let (id, _) = get_leader_info(&stripped).expect("second remains");
        assert_eq!(id, b"second");
    }

    #[test]
    fn strip_template_entries_drops_nonce_and_padding() {
        let mut extra = Vec::new();
        add_tx_pub_key(&mut extra, &[0x42; 32]);
        let pubkey_only = extra.clone();
        add_extra_nonce(&mut extra, &[0u8; 170]).unwrap();
        add_padding(&mut extra, 8);

        assert_eq!(strip_template_entries(&extra).unwrap(), pubkey_only);
    }

    #[test]
    fn extra_nonce_cap_enforced() {
        let mut extra = Vec::new();
        assert!(add_extra_nonce(&mut extra, &[0u8; 256]).is_err());
        assert!(extra.is_empty());
    }

    fn proptest_config() -> ProptestConfig {
        let cases = std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(256);
        ProptestConfig {
            cases,
            ..ProptestConfig::default()
        }
    }

    proptest! {
        #![proptest_config(proptest_config())]

        fn round_trip_any_id_and_signature(
            id in prop::collection::vec(any::<u8>(), 0..12_000),
            sig in prop::array::uniform32(any::<u8>()),
        ) {
            // proptest has no uniform64; double up a 32-byte array.
            let mut signature = [0u8; SIGNATURE_LENGTH];
            signature[..32].copy_from_slice(&sig);
            signature[32..].copy_from_slice(&sig);

            let mut extra = Vec::new();
            add_leader_info(&mut extra, &id, &signature);
            let decoded = get_leader_info(&extra).expect("round trip");
            prop_assert_eq!(decoded.0, id);
            prop_assert_eq!(decoded.1, signature);
        }

        fn decoder_survives_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..4096)) {
            match get_leader_info(&data) {
                Some((id, sig)) => {
                    // Whatever was captured came from within the buffer; the
                    // stripped image plus a re-appended entry must reproduce
                    // the input when the entry sits at the tail.
                    prop_assert!(id.len() + SIGNATURE_LENGTH <= data.len());
                    let stripped = remove_leader_info(&data).expect("decodable entry strips");
                    prop_assert!(stripped.len() < data.len());
                    let mut canonical_entry = Vec::new();
                    add_leader_info(&mut canonical_entry, &id, &sig);
                    if data.ends_with(&canonical_entry) {
                        let mut rebuilt = stripped.clone();
                        add_leader_info(&mut rebuilt, &id, &sig);
                        prop_assert_eq!(rebuilt, data);
                    }
                }
                None => {
                    prop_assert!(remove_leader_info(&data).is_none());
                }
            }
        }

        fn decoder_never_accepts_truncation(
            id in prop::collection::vec(any::<u8>(), 0..300),
            cut in 1usize..80,
        ) {
            let mut extra = Vec::new();
            add_leader_info(&mut extra, &id, &[0xCD; SIGNATURE_LENGTH]);
            let cut = cut.min(extra.len());
            extra.truncate(extra.len() - cut);
            prop_assert!(get_leader_info(&extra).is_none());
        }
    }
}
