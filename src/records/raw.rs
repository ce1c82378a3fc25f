//! # Raw Record Persister
//!
//! The simplest persister: the payload is stored as-is behind a one-byte
//! kind tag. Useful on its own for blob-like resources and as the default
//! serializer when nothing richer is configured.
//!
//! ## Payload Format
//!
//! ```text
//! u8    kind (0 = data, 1 = tombstone)
//! bytes payload (to end of slot; absent for tombstones)
//! ```

use eyre::Result;

use super::{DataRecord, DeweyCodec, NodeKey, PrefixDeweyCodec, RecordSerializer};
use crate::encoding::ByteBuf;
use crate::error::StorageError;

const KIND_DATA: u8 = 0;
const KIND_TOMBSTONE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    node_key: NodeKey,
    payload: Vec<u8>,
    dewey_id: Option<Vec<u8>>,
    tombstone: bool,
}

impl RawRecord {
    pub fn new(node_key: NodeKey, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            node_key,
            payload: payload.into(),
            dewey_id: None,
            tombstone: false,
        }
    }

    pub fn with_dewey_id(mut self, dewey_id: impl Into<Vec<u8>>) -> Self {
        self.dewey_id = Some(dewey_id.into());
        self
    }

    pub fn tombstone(node_key: NodeKey) -> Self {
        Self {
            node_key,
            payload: Vec::new(),
            dewey_id: None,
            tombstone: true,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl DataRecord for RawRecord {
    fn node_key(&self) -> NodeKey {
        self.node_key
    }

    fn dewey_id(&self) -> Option<&[u8]> {
        self.dewey_id.as_deref()
    }

    fn is_tombstone(&self) -> bool {
        self.tombstone
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawRecordSerializer {
    dewey_codec: PrefixDeweyCodec,
}

impl RecordSerializer for RawRecordSerializer {
    type Record = RawRecord;

    fn serialize(&self, out: &mut ByteBuf, record: &Self::Record) -> Result<()> {
        if record.tombstone {
            out.write_u8(KIND_TOMBSTONE);
        } else {
            out.write_u8(KIND_DATA);
            out.write_bytes(&record.payload);
        }
        Ok(())
    }

    fn deserialize(
        &self,
        input: &mut ByteBuf,
        node_key: NodeKey,
        dewey_id: Option<&[u8]>,
    ) -> Result<Self::Record> {
        let kind = input.read_u8()?;
        let record = match kind {
            KIND_DATA => {
                let payload = input.read_vec(input.remaining())?;
                RawRecord {
                    node_key,
                    payload,
                    dewey_id: dewey_id.map(<[u8]>::to_vec),
                    tombstone: false,
                }
            }
            KIND_TOMBSTONE => RawRecord::tombstone(node_key),
            other => {
                return Err(StorageError::RecordDecode {
                    node_key,
                    reason: format!("unknown record kind {other}"),
                }
                .into())
            }
        };
        Ok(record)
    }

    fn tombstone(&self, node_key: NodeKey) -> Self::Record {
        RawRecord::tombstone(node_key)
    }

    fn dewey_codec(&self) -> Option<&dyn DeweyCodec> {
        Some(&self.dewey_codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let serializer = RawRecordSerializer::default();
        let record = RawRecord::new(42, b"hello".to_vec());

        let mut buf = ByteBuf::new();
        serializer.serialize(&mut buf, &record).unwrap();
        let decoded = serializer.deserialize(&mut buf, 42, None).unwrap();

        assert_eq!(decoded, record);
        assert!(!decoded.is_tombstone());
    }

    #[test]
    fn tombstone_roundtrip() {
        let serializer = RawRecordSerializer::default();
        let record = serializer.tombstone(7);

        let mut buf = ByteBuf::new();
        serializer.serialize(&mut buf, &record).unwrap();
        assert_eq!(buf.len(), 1);

        let decoded = serializer.deserialize(&mut buf, 7, None).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded.node_key(), 7);
    }

    #[test]
    fn dewey_id_travels_outside_the_payload() {
        let serializer = RawRecordSerializer::default();
        let record = RawRecord::new(9, b"x".to_vec()).with_dewey_id(vec![0x01, 0x02]);

        let mut buf = ByteBuf::new();
        serializer.serialize(&mut buf, &record).unwrap();
        let decoded = serializer
            .deserialize(&mut buf, 9, Some(&[0x01, 0x02]))
            .unwrap();

        assert_eq!(decoded.dewey_id(), Some(&[0x01, 0x02][..]));
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let serializer = RawRecordSerializer::default();
        let mut buf = ByteBuf::from_vec(vec![9, 1, 2]);
        let err = serializer.deserialize(&mut buf, 1, None).unwrap_err();
        assert!(matches!(
            crate::error::storage_error(&err),
            Some(StorageError::RecordDecode { .. })
        ));
    }
}
