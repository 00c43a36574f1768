//! The snapshot file format: an ASCII-framed, length-prefixed encoding of
//! every database's contents. Distinct from a binary RDB — every field is
//! tagged and every string is length-prefixed, which makes the format
//! trivial to read back a cursor at a time without a schema version dance.
//!
//! ```text
//! HEADER      := "KV0001"
//! FILE        := HEADER DATABASE* "EOF"
//! DATABASE    := "SD" decimal(index) TYPE_BLOCK+
//! TYPE_BLOCK  := "^" decimal(family_tag) ENTRY+
//! ENTRY       := EXPIRE KEY FAMILY_PAYLOAD
//! EXPIRE      := "ST" decimal(absolute_microseconds)   // 0 => no expiration
//! KEY         := "!" decimal(keylen) "#" key_bytes
//! ```

use std::io::{self, Write};

use crate::db::{Database, Family, RawPayload};
use crate::error::{StoreError, StoreResult};

const HEADER: &[u8] = b"KV0001";
const EOF_MARKER: &[u8] = b"EOF";

/// Write every non-empty database to `path`, atomically (temp file + rename)
/// so a reader never observes a half-written snapshot.
pub fn save(databases: &[Database], path: &str) -> io::Result<()> {
    let bytes = save_to_bytes(databases);
    let tmp_path = format!("{path}.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn save_to_bytes(databases: &[Database]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4096);
    buf.extend_from_slice(HEADER);
    for (index, db) in databases.iter().enumerate() {
        if db.size() == 0 {
            continue;
        }
        buf.extend_from_slice(b"SD");
        write_decimal(&mut buf, index as u64);
        for family in Family::ALL {
            write_type_block(&mut buf, db, family);
        }
    }
    buf.extend_from_slice(EOF_MARKER);
    buf
}

fn write_type_block(buf: &mut Vec<u8>, db: &Database, family: Family) {
    let keys: Vec<Vec<u8>> = db.iter_family(family).collect();
    if keys.is_empty() {
        return;
    }
    buf.push(b'^');
    write_decimal(buf, family.tag() as u64);
    for key in keys {
        write_entry(buf, db, family, &key);
    }
}

fn write_entry(buf: &mut Vec<u8>, db: &Database, family: Family, key: &[u8]) {
    buf.extend_from_slice(b"ST");
    write_decimal(buf, db.expire_of(family, key));
    write_framed(buf, b"!", b"#", key);
    match family {
        Family::String => {
            let value = db.string_value(key).expect("key listed by iter_family");
            write_framed(buf, b"!", b"$", value);
        }
        Family::List => {
            let items = db.list_values(key).expect("key listed by iter_family");
            write_decimal_marker(buf, items.len() as u64);
            for item in items {
                write_framed(buf, b"!", b"$", item);
            }
        }
        Family::Hash => {
            let fields = db.hash_entries(key).expect("key listed by iter_family");
            write_decimal_marker(buf, fields.len() as u64);
            for (field, value) in fields {
                write_framed(buf, b"!", b"#", field);
                write_framed(buf, b"!", b"$", value);
            }
        }
        Family::Set => {
            let members = db.set_members(key).expect("key listed by iter_family");
            write_decimal_marker(buf, members.len() as u64);
            for member in members {
                write_framed(buf, b"!", b"$", member);
            }
        }
        Family::SortedSet => {
            let members = db
                .sorted_set_members(key)
                .expect("key listed by iter_family");
            write_decimal_marker(buf, members.len() as u64);
            for (member, score) in members {
                write_framed(buf, b"!", b"#", member);
                write_framed(buf, b"!", b"$", score.to_string().as_bytes());
            }
        }
    }
}

fn write_decimal(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(n.to_string().as_bytes());
}

/// `"!" decimal(n)` with no trailing separator — used for the payload count
/// that precedes a list/hash/set/zset's elements.
fn write_decimal_marker(buf: &mut Vec<u8>, n: u64) {
    buf.push(b'!');
    write_decimal(buf, n);
}

fn write_framed(buf: &mut Vec<u8>, lead: &[u8], sep: &[u8], data: &[u8]) {
    buf.extend_from_slice(lead);
    write_decimal(buf, data.len() as u64);
    buf.extend_from_slice(sep);
    buf.extend_from_slice(data);
}

/// Read cursor over snapshot bytes.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect_literal(&mut self, lit: &[u8]) -> StoreResult<()> {
        if self.remaining().starts_with(lit) {
            self.pos += lit.len();
            Ok(())
        } else {
            Err(StoreError::CorruptSnapshot(format!(
                "expected {:?} at offset {}",
                String::from_utf8_lossy(lit),
                self.pos
            )))
        }
    }

    fn expect_byte(&mut self, b: u8) -> StoreResult<()> {
        self.expect_literal(&[b])
    }

    fn read_decimal(&mut self) -> StoreResult<u64> {
        let start = self.pos;
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(StoreError::CorruptSnapshot(format!(
                "expected digits at offset {start}"
            )));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::CorruptSnapshot("malformed decimal".into()))
    }

    fn read_decimal_score(&mut self) -> StoreResult<f64> {
        let start = self.pos;
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit() || b == b'-' || b == b'.'
            || b == b'e' || b == b'E' || b == b'+')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::CorruptSnapshot("malformed score".into()))
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(StoreError::CorruptSnapshot("unexpected end of file".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// `"!" decimal(len) sep bytes`
    fn read_framed(&mut self, sep: u8) -> StoreResult<&'a [u8]> {
        self.expect_byte(b'!')?;
        let len = self.read_decimal()? as usize;
        self.expect_byte(sep)?;
        self.take(len)
    }
}

/// Parse a snapshot, visiting each entry in database order. If `target` is
/// `Some(index)`, entries outside that database are skipped (still parsed,
/// to keep the cursor advancing, but not materialized) — used by `select`'s
/// merge-reload. `None` visits every database, used at startup.
fn parse(bytes: &[u8], target: Option<usize>, mut visit: impl FnMut(usize, Family, Vec<u8>, RawPayload, u64)) -> StoreResult<()> {
    let mut cur = Cursor::new(bytes);
    cur.expect_literal(HEADER)?;

    loop {
        match cur.peek_byte() {
            Some(b'S') => {
                cur.expect_literal(b"SD")?;
                let index = cur.read_decimal()? as usize;
                let keep = target.is_none_or(|t| t == index);
                loop {
                    match cur.peek_byte() {
                        Some(b'^') => parse_type_block(&mut cur, index, keep, &mut visit)?,
                        _ => break,
                    }
                }
            }
            Some(b'E') => {
                cur.expect_literal(EOF_MARKER)?;
                break;
            }
            _ => {
                return Err(StoreError::CorruptSnapshot(format!(
                    "unexpected token at offset {}",
                    cur.pos
                )));
            }
        }
    }
    Ok(())
}

fn parse_type_block(
    cur: &mut Cursor<'_>,
    db_index: usize,
    keep: bool,
    visit: &mut impl FnMut(usize, Family, Vec<u8>, RawPayload, u64),
) -> StoreResult<()> {
    cur.expect_byte(b'^')?;
    let tag = cur.read_decimal()? as u8;
    let family = Family::from_tag(tag)
        .ok_or_else(|| StoreError::CorruptSnapshot(format!("unknown family tag {tag}")))?;

    loop {
        match cur.peek_byte() {
            Some(b'S') if cur.remaining().starts_with(b"ST") => {
                parse_entry(cur, db_index, family, keep, visit)?;
            }
            _ => break,
        }
    }
    Ok(())
}

fn parse_entry(
    cur: &mut Cursor<'_>,
    db_index: usize,
    family: Family,
    keep: bool,
    visit: &mut impl FnMut(usize, Family, Vec<u8>, RawPayload, u64),
) -> StoreResult<()> {
    cur.expect_literal(b"ST")?;
    let expire = cur.read_decimal()?;
    let key = cur.read_framed(b'#')?.to_vec();

    let payload = match family {
        Family::String => RawPayload::String(cur.read_framed(b'$')?.to_vec()),
        Family::List => {
            cur.expect_byte(b'!')?;
            let count = cur.read_decimal()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(cur.read_framed(b'$')?.to_vec());
            }
            RawPayload::List(items)
        }
        Family::Hash => {
            cur.expect_byte(b'!')?;
            let count = cur.read_decimal()?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let field = cur.read_framed(b'#')?.to_vec();
                let value = cur.read_framed(b'$')?.to_vec();
                fields.push((field, value));
            }
            RawPayload::Hash(fields)
        }
        Family::Set => {
            cur.expect_byte(b'!')?;
            let count = cur.read_decimal()?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                members.push(cur.read_framed(b'$')?.to_vec());
            }
            RawPayload::Set(members)
        }
        Family::SortedSet => {
            cur.expect_byte(b'!')?;
            let count = cur.read_decimal()?;
            let mut members = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let member = cur.read_framed(b'#')?.to_vec();
                cur.expect_byte(b'!')?;
                let _slen = cur.read_decimal()?;
                cur.expect_byte(b'$')?;
                let score = cur.read_decimal_score()?;
                members.push((member, score));
            }
            RawPayload::SortedSet(members)
        }
    };

    if keep {
        visit(db_index, family, key, payload, expire);
    }
    Ok(())
}

/// Load every database from `path` into `databases`, in place. Used at
/// startup; a parse failure here is fatal (the caller aborts the process).
pub fn load_all(path: &str, databases: &mut [Database]) -> StoreResult<()> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    if bytes.is_empty() {
        return Ok(());
    }
    parse(&bytes, None, |index, family, key, payload, expire| {
        if let Some(db) = databases.get_mut(index) {
            db.insert_raw(family, key.clone(), payload);
            if expire > 0 {
                db.set_expire(family, &key, expire);
            }
        }
    })
}

/// Reload a single database (merging into its current contents, not
/// replacing them) from `path`. Used by `select`; a parse failure here is
/// reported to the caller as a reply rather than aborting the process.
pub fn load_one(path: &str, index: usize, db: &mut Database) -> StoreResult<()> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::Io(e)),
    };
    if bytes.is_empty() {
        return Ok(());
    }
    parse(&bytes, Some(index), |_, family, key, payload, expire| {
        db.insert_raw(family, key.clone(), payload);
        if expire > 0 {
            db.set_expire(family, &key, expire);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_family() {
        let mut db = Database::new();
        db.set_string(b"s".to_vec(), b"hello".to_vec());
        db.rpush(b"l", vec![b"a".to_vec(), b"b".to_vec()]);
        db.hset(b"h", b"f".to_vec(), b"v".to_vec());
        db.sadd(b"st", b"m".to_vec());
        db.zadd(b"z", b"m1".to_vec(), 1.5);
        db.zadd(b"z", b"m2".to_vec(), 2.5);

        let mut databases: Vec<Database> = (0..16).map(|_| Database::new()).collect();
        databases[0] = db;
        let bytes = save_to_bytes(&databases);

        let mut reloaded: Vec<Database> = (0..16).map(|_| Database::new()).collect();
        parse(&bytes, None, |index, family, key, payload, expire| {
            if let Some(d) = reloaded.get_mut(index) {
                d.insert_raw(family, key.clone(), payload);
                if expire > 0 {
                    d.set_expire(family, &key, expire);
                }
            }
        })
        .unwrap();

        assert_eq!(
            reloaded[0].get_string(b"s"),
            Some(&b"hello".to_vec())
        );
        assert_eq!(reloaded[0].hgetall_rendered(b"h").unwrap(), "f:v ");
        assert_eq!(reloaded[0].zcard(b"z"), Some(2));
    }

    #[test]
    fn empty_file_loads_as_no_op() {
        let mut databases: Vec<Database> = (0..2).map(|_| Database::new()).collect();
        let result = load_all("/nonexistent/path/does-not-exist.kv", &mut databases);
        assert!(result.is_ok());
    }

    #[test]
    fn corrupt_bytes_surface_as_error() {
        let mut databases: Vec<Database> = (0..2).map(|_| Database::new()).collect();
        let bad = b"NOTKV0001".to_vec();
        let result = parse(&bad, None, |_, _, _, _, _| {});
        assert!(result.is_err());
        let _ = databases;
    }
}
