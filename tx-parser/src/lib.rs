// tx-parser/src/lib.rs

//! Address Extractor (C1): decodes a raw transaction and returns the set
//! of standard pay-to-public-key-hash addresses it references, on both
//! the input and output side, plus its transaction id.
//!
//! The node this system watches runs with segwit disabled (BSV reverted
//! the witness serialization), so the legacy transaction wire format is
//! decoded directly rather than through `bitcoin::Transaction`'s witness-
//! aware `consensus_decode` — that avoids silently accepting witness
//! markers the upstream network never produces.

pub mod base58;

use bitcoin::hashes::{hash160, sha256d, Hash};
use std::collections::BTreeSet;
use thiserror::Error;

pub use base58::Base58Error;

/// Default cap on raw transaction size, matching `MAX_TX_SIZE_BYTES`.
pub const DEFAULT_MAX_TX_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Which network's address version byte to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn version_byte(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }
}

/// Whether `address` is a well-formed, correctly-versioned P2PKH address
/// for `network` — the check the REST surface's `/addresses` endpoint
/// runs to classify input as `invalid`.
pub fn is_valid_address(address: &str, network: Network) -> bool {
    match base58::decode_check(address) {
        Ok((version, payload)) => version == network.version_byte() && payload.len() == 20,
        Err(_) => false,
    }
}

#[derive(Debug, Error)]
pub enum TxParseError {
    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("transaction is {size} bytes, exceeding the {max} byte limit")]
    TxTooLarge { size: usize, max: usize },
}

/// Addresses a transaction references, split by which side of the
/// transaction they appeared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAddresses {
    pub txid: String,
    pub input_addresses: BTreeSet<String>,
    pub output_addresses: BTreeSet<String>,
}

impl ExtractedAddresses {
    /// The union of input and output addresses.
    pub fn all_addresses(&self) -> BTreeSet<String> {
        self.input_addresses
            .union(&self.output_addresses)
            .cloned()
            .collect()
    }
}

/// Decode raw transaction hex and extract its standard-template addresses.
pub fn extract_from_hex(
    hex_str: &str,
    network: Network,
    max_tx_size_bytes: usize,
) -> Result<ExtractedAddresses, TxParseError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| TxParseError::MalformedTx(format!("invalid hex: {e}")))?;
    extract_from_bytes(&bytes, network, max_tx_size_bytes)
}

/// Decode a raw transaction and extract its standard-template addresses.
pub fn extract_from_bytes(
    bytes: &[u8],
    network: Network,
    max_tx_size_bytes: usize,
) -> Result<ExtractedAddresses, TxParseError> {
    if bytes.len() > max_tx_size_bytes {
        return Err(TxParseError::TxTooLarge {
            size: bytes.len(),
            max: max_tx_size_bytes,
        });
    }

    let txid = compute_txid(bytes);

    let mut cursor = Cursor::new(bytes);
    let _version = cursor.read_u32_le()?;

    let input_count = cursor.read_varint()?;
    let mut input_addresses = BTreeSet::new();
    for _ in 0..input_count {
        let _prevout_txid = cursor.read_bytes(32)?;
        let _prevout_vout = cursor.read_u32_le()?;
        let script_len = cursor.read_varint()? as usize;
        let script_sig = cursor.read_bytes(script_len)?;
        let _sequence = cursor.read_u32_le()?;

        if let Some(addr) = address_from_script_sig(script_sig, network) {
            input_addresses.insert(addr);
        }
    }

    let output_count = cursor.read_varint()?;
    let mut output_addresses = BTreeSet::new();
    for _ in 0..output_count {
        let _value = cursor.read_u64_le()?;
        let script_len = cursor.read_varint()? as usize;
        let script_pubkey = cursor.read_bytes(script_len)?;

        if let Some(addr) = address_from_p2pkh_script(script_pubkey, network) {
            output_addresses.insert(addr);
        }
    }

    let _locktime = cursor.read_u32_le()?;
    if !cursor.is_empty() {
        return Err(TxParseError::MalformedTx(format!(
            "{} trailing bytes after locktime",
            cursor.remaining()
        )));
    }

    Ok(ExtractedAddresses {
        txid,
        input_addresses,
        output_addresses,
    })
}

fn compute_txid(bytes: &[u8]) -> String {
    let hash = sha256d::Hash::hash(bytes);
    let mut le = hash.to_byte_array();
    le.reverse();
    hex::encode(le)
}

fn address_from_p2pkh_script(script: &[u8], network: Network) -> Option<String> {
    // OP_DUP OP_HASH160 <20-byte push> OP_EQUALVERIFY OP_CHECKSIG
    if script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Some(base58::encode_check(network.version_byte(), &hash))
    } else {
        None
    }
}

fn address_from_script_sig(script: &[u8], network: Network) -> Option<String> {
    let pushes = parse_pushes(script)?;
    if pushes.len() != 2 {
        return None;
    }
    let pubkey = pushes[1];
    if pubkey.len() != 33 {
        return None;
    }
    let hash = hash160::Hash::hash(pubkey);
    Some(base58::encode_check(
        network.version_byte(),
        hash.as_byte_array(),
    ))
}

/// Parse `script` as a sequence of pure data-push operations. Returns
/// `None` if any opcode is not a push (ruling out non-standard scripts).
fn parse_pushes(script: &[u8]) -> Option<Vec<&[u8]>> {
    let mut i = 0;
    let mut pushes = Vec::new();
    while i < script.len() {
        let opcode = script[i];
        i += 1;
        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            0x4c => {
                let l = *script.get(i)? as usize;
                i += 1;
                l
            }
            0x4d => {
                let b = script.get(i..i + 2)?;
                i += 2;
                u16::from_le_bytes([b[0], b[1]]) as usize
            }
            0x4e => {
                let b = script.get(i..i + 4)?;
                i += 4;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            _ => return None,
        };
        let data = script.get(i..i + len)?;
        pushes.push(data);
        i += len;
    }
    Some(pushes)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], TxParseError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or_else(|| TxParseError::MalformedTx("length overflow".into()))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| TxParseError::MalformedTx("unexpected end of transaction".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u32_le(&mut self) -> Result<u32, TxParseError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_le(&mut self) -> Result<u64, TxParseError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_varint(&mut self) -> Result<u64, TxParseError> {
        let prefix = self.read_bytes(1)?[0];
        match prefix {
            0xfd => {
                let b = self.read_bytes(2)?;
                Ok(u16::from_le_bytes([b[0], b[1]]) as u64)
            }
            0xfe => {
                let b = self.read_bytes(4)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
            }
            0xff => {
                let b = self.read_bytes(8)?;
                Ok(u64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            n => Ok(n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_TX: &str = "01000000014f226ee6c5e75ea5528219c9e98ad372fcb5cd3c9ac300d1cd25680370903dd02e0000006b483045022100e27577999098d75ae8afc04cad0253a879ef052e2776ccd9e1b921d4339a08a102203c9291d9c32ca06799d53567cb05df2ab973f4281a0a2a4bb85066e9d6964aaa41210292acdb57c788c1e8c83cdb0ae8f23e079139ba7ba1bccf67b31653c7af12c4b4ffffffff0140860100000000001976a914be83350213ab6483e111f675268b5bbaba7cdcae88ac00000000";

    #[test]
    fn known_testnet_tx_extracts_expected_addresses() {
        let extracted =
            extract_from_hex(KNOWN_TX, Network::Testnet, DEFAULT_MAX_TX_SIZE_BYTES).unwrap();

        assert!(extracted
            .input_addresses
            .contains("mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR"));
        assert!(extracted
            .output_addresses
            .contains("mxtHrvoExpf55rts14HyyKeZc7FtwSoxY5"));
        assert_eq!(extracted.all_addresses().len(), 2);
    }

    #[test]
    fn oversized_hex_is_rejected() {
        let bytes = vec![0u8; 10];
        let err = extract_from_bytes(&bytes, Network::Mainnet, 5).unwrap_err();
        assert!(matches!(err, TxParseError::TxTooLarge { size: 10, max: 5 }));
    }

    #[test]
    fn tx_size_exactly_at_cap_is_accepted_one_byte_over_fails() {
        let bytes = hex::decode(KNOWN_TX).unwrap();
        assert!(extract_from_bytes(&bytes, Network::Testnet, bytes.len()).is_ok());
        assert!(matches!(
            extract_from_bytes(&bytes, Network::Testnet, bytes.len() - 1),
            Err(TxParseError::TxTooLarge { .. })
        ));
    }

    #[test]
    fn truncated_hex_is_malformed() {
        let bytes = hex::decode(KNOWN_TX).unwrap();
        let truncated = &bytes[..bytes.len() - 10];
        let err = extract_from_bytes(truncated, Network::Testnet, DEFAULT_MAX_TX_SIZE_BYTES)
            .unwrap_err();
        assert!(matches!(err, TxParseError::MalformedTx(_)));
    }

    #[test]
    fn non_standard_output_script_is_silently_skipped() {
        // version(4) + 0 inputs + 1 output (OP_RETURN data, non-P2PKH) + locktime(4)
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes()); // version
        bytes.push(0); // input count = 0
        bytes.push(1); // output count = 1
        bytes.extend_from_slice(&0u64.to_le_bytes()); // value
        let script = vec![0x6a, 0x04, 0xde, 0xad, 0xbe, 0xef]; // OP_RETURN push
        bytes.push(script.len() as u8);
        bytes.extend_from_slice(&script);
        bytes.extend_from_slice(&0u32.to_le_bytes()); // locktime

        let extracted =
            extract_from_bytes(&bytes, Network::Mainnet, DEFAULT_MAX_TX_SIZE_BYTES).unwrap();
        assert!(extracted.all_addresses().is_empty());
    }

    #[test]
    fn duplicate_addresses_within_a_transaction_coalesce() {
        // Two identical P2PKH outputs to the same hash160 must yield one address.
        let hash = [0x11u8; 20];
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&hash);
        script.extend_from_slice(&[0x88, 0xac]);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0); // inputs
        bytes.push(2); // outputs
        for _ in 0..2 {
            bytes.extend_from_slice(&0u64.to_le_bytes());
            bytes.push(script.len() as u8);
            bytes.extend_from_slice(&script);
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let extracted =
            extract_from_bytes(&bytes, Network::Mainnet, DEFAULT_MAX_TX_SIZE_BYTES).unwrap();
        assert_eq!(extracted.output_addresses.len(), 1);
    }

    #[test]
    fn address_validation_checks_network_version() {
        let addr = base58::encode_check(0x6f, &[9u8; 20]);
        assert!(is_valid_address(&addr, Network::Testnet));
        assert!(!is_valid_address(&addr, Network::Mainnet));
        assert!(!is_valid_address("not-an-address", Network::Mainnet));
    }
}
