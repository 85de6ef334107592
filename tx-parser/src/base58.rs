//! Base58Check, hand-rolled to the exact recipe in the address-recognition
//! spec: `version ++ HASH160(payload)`, checksummed with the leading four
//! bytes of `SHA256(SHA256(version ++ payload))`.

use bitcoin::hashes::{sha256d, Hash};

const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Encode `version ++ hash160` as a Base58Check string.
pub fn encode_check(version: u8, hash160: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(version);
    payload.extend_from_slice(hash160);
    let checksum = sha256d::Hash::hash(&payload);
    payload.extend_from_slice(&checksum.to_byte_array()[0..4]);
    encode(&payload)
}

fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();
    let mut digits: Vec<u8> = Vec::new();
    let mut input = bytes.to_vec();
    let mut start = 0;
    while start < input.len() {
        let mut remainder: u32 = 0;
        for byte in input.iter_mut().skip(start) {
            let value = (remainder << 8) + *byte as u32;
            *byte = (value / 58) as u8;
            remainder = value % 58;
        }
        digits.push(ALPHABET[remainder as usize]);
        while start < input.len() && input[start] == 0 {
            start += 1;
        }
    }
    let mut out: Vec<u8> = std::iter::repeat(ALPHABET[0]).take(zeros).collect();
    out.extend(digits.iter().rev());
    // Safe: every byte pushed onto `out` comes from `ALPHABET`, which is ASCII.
    String::from_utf8(out).expect("base58 alphabet is ASCII")
}

/// Decode and verify a Base58Check string, returning `(version, payload)`.
pub fn decode_check(s: &str) -> Result<(u8, Vec<u8>), Base58Error> {
    let data = decode(s)?;
    if data.len() < 5 {
        return Err(Base58Error::TooShort);
    }
    let (body, checksum) = data.split_at(data.len() - 4);
    let expected = sha256d::Hash::hash(body);
    if &expected.to_byte_array()[0..4] != checksum {
        return Err(Base58Error::BadChecksum);
    }
    Ok((body[0], body[1..].to_vec()))
}

fn decode(s: &str) -> Result<Vec<u8>, Base58Error> {
    let zeros = s.bytes().take_while(|&b| b == ALPHABET[0]).count();
    let mut bytes: Vec<u8> = vec![0];
    for ch in s.bytes() {
        let digit = ALPHABET
            .iter()
            .position(|&c| c == ch)
            .ok_or(Base58Error::InvalidChar(ch as char))? as u32;
        let mut carry = digit;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = carry as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push(carry as u8);
            carry >>= 8;
        }
    }
    bytes.resize(bytes.len() + zeros, 0);
    bytes.reverse();
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum Base58Error {
    #[error("invalid base58 character: {0:?}")]
    InvalidChar(char),
    #[error("base58check payload too short")]
    TooShort,
    #[error("base58check checksum mismatch")]
    BadChecksum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let hash = [7u8; 20];
        let addr = encode_check(0x00, &hash);
        let (version, payload) = decode_check(&addr).unwrap();
        assert_eq!(version, 0x00);
        assert_eq!(payload, hash);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let hash = [1u8; 20];
        let mut addr = encode_check(0x00, &hash).into_bytes();
        // flip the last character, which lives in the checksum region
        let last = addr.len() - 1;
        addr[last] = if addr[last] == b'1' { b'2' } else { b'1' };
        let addr = String::from_utf8(addr).unwrap();
        assert!(matches!(decode_check(&addr), Err(Base58Error::BadChecksum)));
    }
}
