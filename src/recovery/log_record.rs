use bytes::{Buf, BufMut};

use crate::recovery::Lsn;
use crate::storage::Rid;
use crate::transaction::TxnId;

/// Common header: [type u8 | lsn u64 | tot_len u32 | txn_id u64 |
/// prev_lsn u64].
pub const LOG_HEADER_SIZE: usize = 29;

const TYPE_BEGIN: u8 = 1;
const TYPE_COMMIT: u8 = 2;
const TYPE_ABORT: u8 = 3;
const TYPE_INSERT: u8 = 4;
const TYPE_DELETE: u8 = 5;
const TYPE_UPDATE: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum LogRecordBody {
    Begin,
    Commit,
    Abort,
    Insert {
        table: String,
        rid: Rid,
        new_record: Vec<u8>,
    },
    Delete {
        table: String,
        rid: Rid,
        old_record: Vec<u8>,
    },
    Update {
        table: String,
        rid: Rid,
        old_record: Vec<u8>,
        new_record: Vec<u8>,
    },
}

impl LogRecordBody {
    /// Data records change pages; transaction markers do not.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            LogRecordBody::Insert { .. } | LogRecordBody::Delete { .. } | LogRecordBody::Update { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub body: LogRecordBody,
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn get_bytes(buf: &mut &[u8]) -> Option<Vec<u8>> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return None;
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Some(out)
}

impl LogRecord {
    fn type_tag(&self) -> u8 {
        match self.body {
            LogRecordBody::Begin => TYPE_BEGIN,
            LogRecordBody::Commit => TYPE_COMMIT,
            LogRecordBody::Abort => TYPE_ABORT,
            LogRecordBody::Insert { .. } => TYPE_INSERT,
            LogRecordBody::Delete { .. } => TYPE_DELETE,
            LogRecordBody::Update { .. } => TYPE_UPDATE,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match &self.body {
            LogRecordBody::Begin | LogRecordBody::Commit | LogRecordBody::Abort => {}
            LogRecordBody::Insert {
                table,
                rid,
                new_record,
            } => {
                put_bytes(&mut body, table.as_bytes());
                body.extend_from_slice(&rid.encode());
                put_bytes(&mut body, new_record);
            }
            LogRecordBody::Delete {
                table,
                rid,
                old_record,
            } => {
                put_bytes(&mut body, table.as_bytes());
                body.extend_from_slice(&rid.encode());
                put_bytes(&mut body, old_record);
            }
            LogRecordBody::Update {
                table,
                rid,
                old_record,
                new_record,
            } => {
                put_bytes(&mut body, table.as_bytes());
                body.extend_from_slice(&rid.encode());
                put_bytes(&mut body, old_record);
                put_bytes(&mut body, new_record);
            }
        }

        let tot_len = (LOG_HEADER_SIZE + body.len()) as u32;
        let mut buf = Vec::with_capacity(tot_len as usize);
        buf.put_u8(self.type_tag());
        buf.put_u64_le(self.lsn);
        buf.put_u32_le(tot_len);
        buf.put_u64_le(self.txn_id);
        buf.put_u64_le(self.prev_lsn);
        buf.extend_from_slice(&body);
        buf
    }

    /// Decode one record from the front of `bytes`. `None` means the tail
    /// is truncated or unrecognisable, i.e. the end of the usable log.
    pub fn decode(bytes: &[u8]) -> Option<(LogRecord, usize)> {
        if bytes.len() < LOG_HEADER_SIZE {
            return None;
        }
        let mut buf = bytes;
        let tag = buf.get_u8();
        let lsn = buf.get_u64_le();
        let tot_len = buf.get_u32_le() as usize;
        let txn_id = buf.get_u64_le();
        let prev_lsn = buf.get_u64_le();
        if tot_len < LOG_HEADER_SIZE || bytes.len() < tot_len {
            return None;
        }
        let mut body_buf = &bytes[LOG_HEADER_SIZE..tot_len];

        let body = match tag {
            TYPE_BEGIN => LogRecordBody::Begin,
            TYPE_COMMIT => LogRecordBody::Commit,
            TYPE_ABORT => LogRecordBody::Abort,
            TYPE_INSERT => {
                let table = String::from_utf8(get_bytes(&mut body_buf)?).ok()?;
                if body_buf.remaining() < 8 {
                    return None;
                }
                let mut rid_bytes = [0u8; 8];
                body_buf.copy_to_slice(&mut rid_bytes);
                let rid = Rid::decode(&rid_bytes);
                let new_record = get_bytes(&mut body_buf)?;
                LogRecordBody::Insert {
                    table,
                    rid,
                    new_record,
                }
            }
            TYPE_DELETE => {
                let table = String::from_utf8(get_bytes(&mut body_buf)?).ok()?;
                if body_buf.remaining() < 8 {
                    return None;
                }
                let mut rid_bytes = [0u8; 8];
                body_buf.copy_to_slice(&mut rid_bytes);
                let rid = Rid::decode(&rid_bytes);
                let old_record = get_bytes(&mut body_buf)?;
                LogRecordBody::Delete {
                    table,
                    rid,
                    old_record,
                }
            }
            TYPE_UPDATE => {
                let table = String::from_utf8(get_bytes(&mut body_buf)?).ok()?;
                if body_buf.remaining() < 8 {
                    return None;
                }
                let mut rid_bytes = [0u8; 8];
                body_buf.copy_to_slice(&mut rid_bytes);
                let rid = Rid::decode(&rid_bytes);
                let old_record = get_bytes(&mut body_buf)?;
                let new_record = get_bytes(&mut body_buf)?;
                LogRecordBody::Update {
                    table,
                    rid,
                    old_record,
                    new_record,
                }
            }
            _ => return None,
        };

        Some((
            LogRecord {
                lsn,
                txn_id,
                prev_lsn,
                body,
            },
            tot_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let records = vec![
            LogRecord {
                lsn: 1,
                txn_id: 7,
                prev_lsn: 0,
                body: LogRecordBody::Begin,
            },
            LogRecord {
                lsn: 2,
                txn_id: 7,
                prev_lsn: 1,
                body: LogRecordBody::Insert {
                    table: "t".to_string(),
                    rid: Rid::new(1, 3),
                    new_record: vec![1, 2, 3, 4],
                },
            },
            LogRecord {
                lsn: 3,
                txn_id: 7,
                prev_lsn: 2,
                body: LogRecordBody::Update {
                    table: "t".to_string(),
                    rid: Rid::new(1, 3),
                    old_record: vec![1, 2, 3, 4],
                    new_record: vec![5, 6, 7, 8],
                },
            },
            LogRecord {
                lsn: 4,
                txn_id: 7,
                prev_lsn: 3,
                body: LogRecordBody::Commit,
            },
        ];

        let mut stream = Vec::new();
        for record in &records {
            stream.extend_from_slice(&record.encode());
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while let Some((record, consumed)) = LogRecord::decode(&stream[offset..]) {
            decoded.push(record);
            offset += consumed;
        }
        assert_eq!(decoded, records);
        assert_eq!(offset, stream.len());
    }

    #[test]
    fn truncated_tail_is_end_of_log() {
        let record = LogRecord {
            lsn: 1,
            txn_id: 1,
            prev_lsn: 0,
            body: LogRecordBody::Delete {
                table: "t".to_string(),
                rid: Rid::new(2, 0),
                old_record: vec![9; 16],
            },
        };
        let bytes = record.encode();
        // Chop the record anywhere: decode reports end-of-log.
        assert!(LogRecord::decode(&bytes[..bytes.len() - 1]).is_none());
        assert!(LogRecord::decode(&bytes[..10]).is_none());
    }
}
