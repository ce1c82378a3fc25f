//! # Overflow Page
//!
//! Opaque byte container for a single record whose serialized payload
//! exceeds `MAX_RECORD_SIZE`. The leaf keeps only a reference; the payload
//! lives here, write-once.
//!
//! ## Wire Format
//!
//! ```text
//! i32   len
//! bytes data
//! ```

use eyre::Result;

use crate::encoding::ByteBuf;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowPage {
    data: Vec<u8>,
}

impl OverflowPage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn serialize(&self, out: &mut ByteBuf) {
        out.write_i32(self.data.len() as i32);
        out.write_bytes(&self.data);
    }

    pub fn deserialize(input: &mut ByteBuf) -> Result<Self> {
        let len = input.read_i32()?;
        if len < 0 {
            return Err(StorageError::corrupt(format!("negative overflow length {len}")).into());
        }
        let data = input.read_vec(len as usize)?;
        Ok(Self { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let page = OverflowPage::new(vec![7; 1000]);
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf);
        assert_eq!(buf.len(), 4 + 1000);

        let decoded = OverflowPage::deserialize(&mut buf).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let page = OverflowPage::new(Vec::new());
        let mut buf = ByteBuf::new();
        page.serialize(&mut buf);
        let decoded = OverflowPage::deserialize(&mut buf).unwrap();
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn negative_length_rejected() {
        let mut buf = ByteBuf::new();
        buf.write_i32(-5);
        assert!(OverflowPage::deserialize(&mut buf).is_err());
    }

    #[test]
    fn truncated_payload_rejected() {
        let mut buf = ByteBuf::new();
        buf.write_i32(10);
        buf.write_bytes(&[1, 2, 3]);
        assert!(OverflowPage::deserialize(&mut buf).is_err());
    }
}
