//! Binary encoding of transaction prefixes and signatures

use std::io::{self, Write};

use byteorder::WriteBytesExt;

use cn_sync::primitives::{Hash, KeyImage, PublicKey, Signature};

pub const TRANSACTION_VERSION: u64 = 1;

const TAG_KEY_INPUT: u8 = 0x02;
const TAG_KEY_OUTPUT: u8 = 0x02;

const EXTRA_TAG_PUBKEY: u8 = 0x01;
const EXTRA_TAG_NONCE: u8 = 0x02;
const EXTRA_TAG_MERGE_MINING: u8 = 0x03;
const NONCE_TAG_PAYMENT_ID: u8 = 0x00;
const NONCE_TAG_ARBITRARY_DATA: u8 = 0x7f;

/// LEB128 encoding used for every integer in the transaction prefix
pub fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> io::Result<()> {
    while value >= 0x80 {
        writer.write_u8((value as u8 & 0x7f) | 0x80)?;
        value >>= 7;
    }
    writer.write_u8(value as u8)
}

pub fn varint_len(value: u64) -> usize {
    let mut buffer = Vec::with_capacity(10);
    // Writing to a Vec can not fail
    let _ = write_varint(&mut buffer, value);
    buffer.len()
}

/// Turns sorted absolute global indexes into the offsets stored on chain
pub fn absolute_to_relative_offsets(absolute: &[u64]) -> Vec<u64> {
    let mut previous = 0;
    absolute
        .iter()
        .map(|index| {
            let offset = index - previous;
            previous = *index;
            offset
        })
        .collect()
}

pub struct WireInput {
    pub amount: u64,
    pub relative_offsets: Vec<u64>,
    pub key_image: KeyImage,
}

pub struct WireOutput {
    pub amount: u64,
    pub key: PublicKey,
}

/// Builds the extra field: transaction public key, then an optional nonce holding the
/// payment id and arbitrary data
pub fn build_extra(
    transaction_public_key: &PublicKey,
    payment_id: Option<&Hash>,
    extra_data: &[u8],
) -> Vec<u8> {
    let mut extra = Vec::with_capacity(33);
    extra.push(EXTRA_TAG_PUBKEY);
    extra.extend_from_slice(transaction_public_key.as_bytes());

    let mut nonce = Vec::new();
    if let Some(payment_id) = payment_id {
        nonce.push(NONCE_TAG_PAYMENT_ID);
        nonce.extend_from_slice(payment_id.as_bytes());
    }
    if !extra_data.is_empty() {
        nonce.push(NONCE_TAG_ARBITRARY_DATA);
        nonce.extend_from_slice(extra_data);
    }

    if !nonce.is_empty() {
        extra.push(EXTRA_TAG_NONCE);
        let _ = write_varint(&mut extra, nonce.len() as u64);
        extra.extend_from_slice(&nonce);
    }

    extra
}

/// Reads the payment id back out of an extra field, skipping tags it does not understand
pub fn payment_id_from_extra(extra: &[u8]) -> Option<Hash> {
    let mut position = 0;
    while position < extra.len() {
        match extra[position] {
            EXTRA_TAG_PUBKEY => position += 33,
            EXTRA_TAG_NONCE | EXTRA_TAG_MERGE_MINING => {
                let (length, read) = read_varint(&extra[position + 1..])?;
                let start = position + 1 + read;
                let end = start.checked_add(usize::try_from(length).ok()?)?;
                let field = extra.get(start..end)?;
                if extra[position] == EXTRA_TAG_NONCE
                    && field.first() == Some(&NONCE_TAG_PAYMENT_ID)
                {
                    let bytes: [u8; 32] = field.get(1..33)?.try_into().ok()?;
                    return Some(Hash::from_bytes(bytes));
                }
                position = end;
            }
            _ => return None,
        }
    }
    None
}

fn read_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Serializes a version 1 transaction prefix
pub fn write_prefix<W: Write>(
    writer: &mut W,
    unlock_time: u64,
    inputs: &[WireInput],
    outputs: &[WireOutput],
    extra: &[u8],
) -> io::Result<()> {
    write_varint(writer, TRANSACTION_VERSION)?;
    write_varint(writer, unlock_time)?;

    write_varint(writer, inputs.len() as u64)?;
    for input in inputs {
        writer.write_u8(TAG_KEY_INPUT)?;
        write_varint(writer, input.amount)?;
        write_varint(writer, input.relative_offsets.len() as u64)?;
        for offset in &input.relative_offsets {
            write_varint(writer, *offset)?;
        }
        writer.write_all(input.key_image.as_bytes())?;
    }

    write_varint(writer, outputs.len() as u64)?;
    for output in outputs {
        write_varint(writer, output.amount)?;
        writer.write_u8(TAG_KEY_OUTPUT)?;
        writer.write_all(output.key.as_bytes())?;
    }

    write_varint(writer, extra.len() as u64)?;
    writer.write_all(extra)
}

pub fn write_signatures<W: Write>(writer: &mut W, signatures: &[Vec<Signature>]) -> io::Result<()> {
    for ring in signatures {
        for signature in ring {
            writer.write_all(signature.as_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0 => vec![0x00] ; "zero")]
    #[test_case(127 => vec![0x7f] ; "one byte")]
    #[test_case(128 => vec![0x80, 0x01] ; "two bytes")]
    #[test_case(300 => vec![0xac, 0x02] ; "three hundred")]
    fn varints(value: u64) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_varint(&mut buffer, value).unwrap();
        assert_eq!(buffer.len(), varint_len(value));
        assert_eq!(read_varint(&buffer), Some((value, buffer.len())));
        buffer
    }

    #[test]
    fn relative_offsets() {
        assert_eq!(absolute_to_relative_offsets(&[5, 15, 16, 100]), vec![5, 10, 1, 84]);
        assert!(absolute_to_relative_offsets(&[]).is_empty());
    }

    #[test]
    fn extra_layout() {
        let key = PublicKey::from_bytes([9; 32]);
        let payment_id = Hash::from_bytes([3; 32]);

        let bare = build_extra(&key, None, &[]);
        assert_eq!(bare.len(), 33);
        assert_eq!(bare[0], EXTRA_TAG_PUBKEY);
        assert_eq!(payment_id_from_extra(&bare), None);

        let full = build_extra(&key, Some(&payment_id), b"hello");
        assert_eq!(full[33], EXTRA_TAG_NONCE);
        assert_eq!(full[34] as usize, 33 + 6);
        assert_eq!(full.len(), 33 + 2 + 33 + 6);
        assert_eq!(payment_id_from_extra(&full), Some(payment_id));

        let data_only = build_extra(&key, None, b"hello");
        assert_eq!(data_only.len(), 33 + 2 + 6);
        assert_eq!(payment_id_from_extra(&data_only), None);
    }

    #[test]
    fn prefix_layout() {
        let inputs = [WireInput {
            amount: 1000,
            relative_offsets: vec![5, 10],
            key_image: KeyImage::from_bytes([1; 32]),
        }];
        let outputs = [WireOutput {
            amount: 990,
            key: PublicKey::from_bytes([2; 32]),
        }];
        let extra = build_extra(&PublicKey::from_bytes([3; 32]), None, &[]);

        let mut buffer = Vec::new();
        write_prefix(&mut buffer, 0, &inputs, &outputs, &extra).unwrap();

        let expected_len = 2 // version, unlock time
            + 1 + 1 + 2 + 1 + 2 + 32 // input count, tag, amount, ring size, offsets, key image
            + 1 + 2 + 1 + 32 // output count, amount, tag, key
            + 1 + 33; // extra
        assert_eq!(buffer.len(), expected_len);
        assert_eq!(&buffer[..3], &[1, 0, 1]);
        assert_eq!(buffer[3], TAG_KEY_INPUT);
    }
}
