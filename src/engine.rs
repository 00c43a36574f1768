//! The top-level store: 16 databases, a current-database cursor, and the
//! fixed command dispatch table.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::db::Database;
use crate::error::StoreError;
use crate::persistence::rdb;

/// A command handler's reply, folded into the wire protocol's three textual
/// categories by [`Reply::render`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Payload(String),
    NotFound(String),
    IoError(String),
}

impl Reply {
    pub fn render(&self) -> String {
        match self {
            Reply::Ok => "OK\n".to_string(),
            Reply::Payload(body) => format!("{body}\n"),
            Reply::NotFound(msg) => format!("NotFound: {msg}\n"),
            Reply::IoError(msg) => format!("IO Error: {msg}\n"),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

pub struct Engine {
    databases: Vec<Database>,
    current_index: usize,
    last_snapshot_time: Option<u64>,
    dump_path: String,
    snapshot_interval_secs: u64,
}

impl Engine {
    pub fn new(num_databases: usize, dump_path: String, snapshot_interval_secs: u64) -> Self {
        Engine {
            databases: (0..num_databases).map(|_| Database::new()).collect(),
            current_index: 0,
            last_snapshot_time: None,
            dump_path,
            snapshot_interval_secs,
        }
    }

    /// Load every database from the snapshot file. Intended for startup use;
    /// the caller decides what "fatal" means for a parse failure here.
    pub fn load_from_disk(&mut self) -> crate::error::StoreResult<()> {
        rdb::load_all(&self.dump_path, &mut self.databases)
    }

    pub fn current_db(&mut self) -> &mut Database {
        &mut self.databases[self.current_index]
    }

    pub fn run_periodic_sampling(&mut self, sample_size: usize) {
        for db in self.databases.iter_mut() {
            db.run_periodic_sampling(sample_size);
        }
    }

    // ---- commands ----

    pub fn cmd_set(&mut self, args: &[&[u8]]) -> Reply {
        let [key, value] = args else {
            return param_error();
        };
        self.current_db().set_string(key.to_vec(), value.to_vec());
        Reply::Ok
    }

    pub fn cmd_get(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().get_string(key) {
            Some(value) => Reply::Payload(String::from_utf8_lossy(value).into_owned()),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_pexpire(&mut self, args: &[&[u8]]) -> Reply {
        let [key, ms] = args else {
            return param_error();
        };
        let ms = match parse_i64(ms) {
            Ok(ms) => ms,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        if self.current_db().pexpire_any_family(key, ms) {
            Reply::Ok
        } else {
            Reply::NotFound("key".to_string())
        }
    }

    pub fn cmd_expire(&mut self, args: &[&[u8]]) -> Reply {
        let [key, secs] = args else {
            return param_error();
        };
        let secs = match parse_i64(secs) {
            Ok(secs) => secs,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        let ms = secs.saturating_mul(1000);
        let ms_bytes = ms.to_string().into_bytes();
        self.cmd_pexpire(&[key, &ms_bytes])
    }

    pub fn cmd_bgsave(&mut self, args: &[&[u8]]) -> Reply {
        if !args.is_empty() {
            return param_error();
        }
        let now = now_secs();
        let elapsed_ok = self
            .last_snapshot_time
            .is_none_or(|t| now.saturating_sub(t) >= self.snapshot_interval_secs);
        if !elapsed_ok {
            return Reply::Ok;
        }
        match rdb::save(&self.databases, &self.dump_path) {
            Ok(()) => {
                self.last_snapshot_time = Some(now);
                info!(path = %self.dump_path, "snapshot written");
                Reply::Ok
            }
            Err(e) => {
                warn!(error = %e, "snapshot write failed");
                Reply::IoError(e.to_string())
            }
        }
    }

    pub fn cmd_select(&mut self, args: &[&[u8]]) -> Reply {
        let [index] = args else {
            return param_error();
        };
        let index = match parse_i64(index) {
            Ok(index) => index,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        let Some(target) = index.checked_sub(1).and_then(|i| usize::try_from(i).ok()) else {
            return param_error();
        };
        if target >= self.databases.len() {
            return param_error();
        }
        self.current_index = target;
        match rdb::load_one(&self.dump_path, target, &mut self.databases[target]) {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::IoError(e.to_string()),
        }
    }

    pub fn cmd_rpush(&mut self, args: &[&[u8]]) -> Reply {
        if args.len() < 2 {
            return param_error();
        }
        let key = args[0];
        let values = args[1..].iter().map(|v| v.to_vec()).collect();
        self.current_db().rpush(key, values);
        Reply::Ok
    }

    pub fn cmd_rpop(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().rpop(key) {
            Some(value) => Reply::Payload(String::from_utf8_lossy(&value).into_owned()),
            None => Reply::IoError("rpop error".to_string()),
        }
    }

    pub fn cmd_hset(&mut self, args: &[&[u8]]) -> Reply {
        let [key, field, value] = args else {
            return param_error();
        };
        self.current_db().hset(key, field.to_vec(), value.to_vec());
        Reply::Ok
    }

    pub fn cmd_hget(&mut self, args: &[&[u8]]) -> Reply {
        let [key, field] = args else {
            return param_error();
        };
        match self.current_db().hget(key, field) {
            Some(value) => Reply::Payload(String::from_utf8_lossy(&value).into_owned()),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_hgetall(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().hgetall_rendered(key) {
            Some(rendered) => Reply::Payload(rendered),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_sadd(&mut self, args: &[&[u8]]) -> Reply {
        let [key, member] = args else {
            return param_error();
        };
        self.current_db().sadd(key, member.to_vec());
        Reply::Ok
    }

    pub fn cmd_smembers(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().smembers_rendered(key) {
            Some(rendered) => Reply::Payload(rendered),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_zadd(&mut self, args: &[&[u8]]) -> Reply {
        let [key, member, score] = args else {
            return param_error();
        };
        let score = match parse_f64(score) {
            Ok(score) => score,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        self.current_db().zadd(key, member.to_vec(), score);
        Reply::Ok
    }

    pub fn cmd_zcard(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().zcard(key) {
            Some(count) => Reply::Payload(count.to_string()),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_zrange(&mut self, args: &[&[u8]]) -> Reply {
        let [key, lo, hi] = args else {
            return param_error();
        };
        let (lo, hi) = match parse_range(lo, hi) {
            Ok(bounds) => bounds,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        match self.current_db().zrange_rendered(key, lo, hi) {
            Some(rendered) => Reply::Payload(rendered),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_zcount(&mut self, args: &[&[u8]]) -> Reply {
        let [key, lo, hi] = args else {
            return param_error();
        };
        let (lo, hi) = match parse_range(lo, hi) {
            Ok(bounds) => bounds,
            Err(e) => return Reply::IoError(e.to_string()),
        };
        match self.current_db().zcount(key, lo, hi) {
            Some(count) => Reply::Payload(format!("(count){count}")),
            None => Reply::NotFound("key".to_string()),
        }
    }

    pub fn cmd_zgetall(&mut self, args: &[&[u8]]) -> Reply {
        let [key] = args else {
            return param_error();
        };
        match self.current_db().zgetall_rendered(key) {
            Some(rendered) => Reply::Payload(rendered),
            None => Reply::NotFound("key".to_string()),
        }
    }

    // ---- ambient additions (PING/ECHO-style liveness and introspection) ----

    pub fn cmd_ping(&mut self, args: &[&[u8]]) -> Reply {
        if !args.is_empty() {
            return param_error();
        }
        Reply::Payload("PONG".to_string())
    }

    pub fn cmd_dbsize(&mut self, args: &[&[u8]]) -> Reply {
        if !args.is_empty() {
            return param_error();
        }
        Reply::Payload(self.current_db().size().to_string())
    }
}

fn param_error() -> Reply {
    Reply::IoError(StoreError::ParameterError.to_string())
}

fn parse_i64(bytes: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(StoreError::NotANumber)
}

fn parse_f64(bytes: &[u8]) -> Result<f64, StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(StoreError::NotANumber)
}

fn parse_range(lo: &[u8], hi: &[u8]) -> Result<(f64, f64), StoreError> {
    Ok((parse_f64(lo)?, parse_f64(hi)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(v: &'a [&'a str]) -> Vec<&'a [u8]> {
        v.iter().map(|s| s.as_bytes()).collect()
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine.kv".to_string(), 1000);
        let a = args(&["k", "v"]);
        assert_eq!(engine.cmd_set(&a), Reply::Ok);
        let a = args(&["k"]);
        assert_eq!(engine.cmd_get(&a), Reply::Payload("v".to_string()));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine2.kv".to_string(), 1000);
        let a = args(&["missing"]);
        assert_eq!(engine.cmd_get(&a), Reply::NotFound("key".to_string()));
    }

    #[test]
    fn wrong_arity_is_parameter_error() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine3.kv".to_string(), 1000);
        let a = args(&["k"]);
        assert_eq!(
            engine.cmd_set(&a),
            Reply::IoError("Parameter error".to_string())
        );
    }

    #[test]
    fn zcount_renders_count_prefix() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine4.kv".to_string(), 1000);
        engine.cmd_zadd(&args(&["z", "m1", "1"]));
        engine.cmd_zadd(&args(&["z", "m2", "2"]));
        assert_eq!(
            engine.cmd_zcount(&args(&["z", "1", "2"])),
            Reply::Payload("(count)2".to_string())
        );
    }

    #[test]
    fn ping_replies_pong() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine5.kv".to_string(), 1000);
        assert_eq!(engine.cmd_ping(&[]), Reply::Payload("PONG".to_string()));
    }

    #[test]
    fn rpop_on_empty_list_is_io_error() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine6.kv".to_string(), 1000);
        assert_eq!(
            engine.cmd_rpop(&args(&["missing"])),
            Reply::IoError("rpop error".to_string())
        );
    }

    #[test]
    fn zrange_with_no_members_in_range_is_not_found() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine7.kv".to_string(), 1000);
        engine.cmd_zadd(&args(&["z", "m1", "1"]));
        assert_eq!(
            engine.cmd_zrange(&args(&["z", "100", "200"])),
            Reply::NotFound("key".to_string())
        );
    }

    #[test]
    fn non_numeric_argument_is_not_a_number_error() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-engine8.kv".to_string(), 1000);
        assert_eq!(
            engine.cmd_pexpire(&args(&["k", "not-a-number"])),
            Reply::IoError("value is not a number".to_string())
        );
    }
}
