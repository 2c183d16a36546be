//! Wire form of a single handshake extension.

use crate::error::{Error, Result};
use crate::ext::armor;

/// `type(2, BE) || length(2, BE) || payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRecord {
    ext_type: u16,
    payload: Vec<u8>,
}

impl ExtensionRecord {
    /// Largest payload the 2-byte length field can describe.
    pub const MAX_PAYLOAD: usize = u16::MAX as usize;

    pub fn new(ext_type: u16, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
            });
        }
        Ok(Self { ext_type, payload })
    }

    pub fn ext_type(&self) -> u16 {
        self.ext_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.payload.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ext_type.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode one record from the front of `data`, returning it and the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::MalformedRecord("shorter than the 4-byte header"));
        }
        let ext_type = u16::from_be_bytes([data[0], data[1]]);
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let payload = data
            .get(4..4 + len)
            .ok_or(Error::MalformedRecord("payload shorter than its length field"))?;
        Ok((
            Self {
                ext_type,
                payload: payload.to_vec(),
            },
            4 + len,
        ))
    }

    /// Armor label naming this record's type.
    pub fn label(&self) -> String {
        format!("SERVERINFO FOR EXTENSION {}", self.ext_type)
    }

    pub fn to_armor(&self) -> String {
        armor::encode(&self.label(), &self.encode())
    }

    /// Parse an armored block back into a record; the label must agree
    /// with the encoded type and nothing may trail the record.
    pub fn from_armor(text: &str) -> Result<Self> {
        let block = armor::decode(text)?;
        let (record, used) = Self::decode(&block.data)?;
        if used != block.data.len() {
            return Err(Error::MalformedRecord("trailing bytes after record"));
        }
        if block.label != record.label() {
            return Err(Error::MalformedRecord("label does not match extension type"));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prefixes_type_and_length() {
        let r = ExtensionRecord::new(18, vec![0xDE, 0xAD, 0xBE]).unwrap();
        assert_eq!(r.encode(), vec![0x00, 0x12, 0x00, 0x03, 0xDE, 0xAD, 0xBE]);
        assert_eq!(r.encoded_len(), 7);
    }

    #[test]
    fn large_type_and_length_are_big_endian() {
        let r = ExtensionRecord::new(0xABCD, vec![0u8; 0x0102]).unwrap();
        let enc = r.encode();
        assert_eq!(&enc[..4], &[0xAB, 0xCD, 0x01, 0x02]);
    }

    #[test]
    fn max_payload_accepted_oversize_rejected() {
        assert!(ExtensionRecord::new(1, vec![0u8; ExtensionRecord::MAX_PAYLOAD]).is_ok());
        assert!(matches!(
            ExtensionRecord::new(1, vec![0u8; ExtensionRecord::MAX_PAYLOAD + 1]),
            Err(Error::PayloadTooLarge { len: 65536 })
        ));
    }

    #[test]
    fn decode_reports_consumed_bytes() {
        let data = [0, 18, 0, 2, 7, 8, 0xFF];
        let (r, used) = ExtensionRecord::decode(&data).unwrap();
        assert_eq!(used, 6);
        assert_eq!(r.ext_type(), 18);
        assert_eq!(r.payload(), &[7, 8]);
    }

    #[test]
    fn decode_truncated() {
        assert!(ExtensionRecord::decode(&[0, 18, 0]).is_err());
        assert!(ExtensionRecord::decode(&[0, 18, 0, 5, 1]).is_err());
    }

    #[test]
    fn armor_label_names_type() {
        let r = ExtensionRecord::new(18, b"sct".to_vec()).unwrap();
        let text = r.to_armor();
        assert!(text.starts_with("-----BEGIN SERVERINFO FOR EXTENSION 18-----\n"));
        assert!(text.contains("END SERVERINFO FOR EXTENSION 18"));
        assert_eq!(ExtensionRecord::from_armor(&text).unwrap(), r);
    }

    #[test]
    fn armor_label_mismatch_rejected() {
        let r = ExtensionRecord::new(18, b"x".to_vec()).unwrap();
        let forged = armor::encode("SERVERINFO FOR EXTENSION 19", &r.encode());
        assert!(ExtensionRecord::from_armor(&forged).is_err());
    }
}
