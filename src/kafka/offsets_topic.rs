//! Decoder for records on the broker's internal offsets topic.
//!
//! Keys start with an i16 schema version: 0 and 1 carry an offset commit
//! (group, topic, partition), 2 carries group metadata. Commit values are
//! versioned separately:
//!
//! | version | layout                                                   |
//! |---------|----------------------------------------------------------|
//! | 0       | offset, metadata, commit timestamp                       |
//! | 1       | offset, metadata, commit timestamp, expire timestamp     |
//! | 2       | offset, metadata, commit timestamp                       |
//! | 3       | offset, leader epoch, metadata, commit timestamp         |

use crate::error::{LagwatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub commit_timestamp_ms: i64,
}

/// Big-endian cursor over a record key or value.
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or_else(|| truncated(self.pos, N))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.take::<2>().map(i16::from_be_bytes)
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_be_bytes)
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.take::<8>().map(i64::from_be_bytes)
    }

    /// i16 length-prefixed string; a negative length is a null string.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i16()?;
        if len < 0 {
            return Ok(String::new());
        }
        let len = len as usize;
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| truncated(self.pos, len))?;
        self.pos += len;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| LagwatchError::Decode(format!("invalid UTF-8 string: {e}")))
    }
}

fn truncated(pos: usize, wanted: usize) -> LagwatchError {
    LagwatchError::Decode(format!("record truncated at byte {pos} (wanted {wanted} more)"))
}

/// Decode one offsets-topic record. Returns `Ok(None)` for group metadata and
/// tombstones, which carry no committed offset.
pub fn decode_commit(key: &[u8], value: Option<&[u8]>) -> Result<Option<CommitRecord>> {
    let mut key_reader = ByteReader::new(key);
    let key_version = key_reader.read_i16()?;
    match key_version {
        0 | 1 => {}
        2 => return Ok(None),
        other => {
            return Err(LagwatchError::Decode(format!(
                "unknown key version {other}"
            )));
        }
    }

    let group = key_reader.read_string()?;
    let topic = key_reader.read_string()?;
    let partition = key_reader.read_i32()?;

    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    let mut reader = ByteReader::new(value);
    let value_version = reader.read_i16()?;
    let (offset, commit_timestamp_ms) = match value_version {
        0..=2 => {
            let offset = reader.read_i64()?;
            let _metadata = reader.read_string()?;
            let timestamp = reader.read_i64()?;
            (offset, timestamp)
        }
        3 => {
            let offset = reader.read_i64()?;
            let _leader_epoch = reader.read_i32()?;
            let _metadata = reader.read_string()?;
            let timestamp = reader.read_i64()?;
            (offset, timestamp)
        }
        other => {
            return Err(LagwatchError::Decode(format!(
                "unknown offset value version {other}"
            )));
        }
    };

    Ok(Some(CommitRecord {
        group,
        topic,
        partition,
        offset,
        commit_timestamp_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as i16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    fn commit_key(version: i16, group: &str, topic: &str, partition: i32) -> Vec<u8> {
        let mut key = version.to_be_bytes().to_vec();
        string(&mut key, group);
        string(&mut key, topic);
        key.extend_from_slice(&partition.to_be_bytes());
        key
    }

    fn commit_value(version: i16, offset: i64, timestamp: i64) -> Vec<u8> {
        let mut value = version.to_be_bytes().to_vec();
        value.extend_from_slice(&offset.to_be_bytes());
        if version == 3 {
            value.extend_from_slice(&7i32.to_be_bytes());
        }
        string(&mut value, "meta");
        value.extend_from_slice(&timestamp.to_be_bytes());
        if version == 1 {
            value.extend_from_slice(&(timestamp + 86_400_000).to_be_bytes());
        }
        value
    }

    #[test]
    fn test_decode_every_value_version() {
        let key = commit_key(1, "billing", "orders", 3);
        for version in 0..=3 {
            let value = commit_value(version, 4200, 1_700_000_000_000);
            let record = decode_commit(&key, Some(&value)).unwrap().unwrap();
            assert_eq!(
                record,
                CommitRecord {
                    group: "billing".to_string(),
                    topic: "orders".to_string(),
                    partition: 3,
                    offset: 4200,
                    commit_timestamp_ms: 1_700_000_000_000,
                },
                "value version {version}"
            );
        }
    }

    #[test]
    fn test_group_metadata_and_tombstones_skipped() {
        let mut metadata_key = 2i16.to_be_bytes().to_vec();
        string(&mut metadata_key, "billing");
        assert_eq!(decode_commit(&metadata_key, Some(&[0, 3])).unwrap(), None);

        let key = commit_key(0, "billing", "orders", 0);
        assert_eq!(decode_commit(&key, None).unwrap(), None);
        assert_eq!(decode_commit(&key, Some(&[])).unwrap(), None);
    }

    #[test]
    fn test_truncated_and_unknown_records_are_errors() {
        let key = commit_key(1, "billing", "orders", 0);
        let value = commit_value(1, 1, 1);

        assert!(decode_commit(&key[..5], Some(&value)).is_err());
        assert!(decode_commit(&key, Some(&value[..9])).is_err());
        assert!(decode_commit(&[0, 9], Some(&value)).is_err());

        let mut future_value = value.clone();
        future_value[1] = 9;
        assert!(matches!(
            decode_commit(&key, Some(&future_value)),
            Err(LagwatchError::Decode(_))
        ));
    }
}
