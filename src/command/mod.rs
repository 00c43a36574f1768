//! Request parsing and verb dispatch for the plain-text wire protocol.

use crate::engine::{Engine, Reply};

/// Split one request line (`VERB [ARG ...]`, trailing `\n` already stripped)
/// into whitespace-separated tokens.
pub fn parse_line(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Dispatch a parsed command line to the engine. An empty line, or a verb
/// not in the fixed command table, replies as if the command were unknown.
pub fn dispatch(engine: &mut Engine, tokens: &[&str]) -> Reply {
    let Some((verb, rest)) = tokens.split_first() else {
        return Reply::NotFound("command".to_string());
    };
    let args: Vec<&[u8]> = rest.iter().map(|s| s.as_bytes()).collect();

    match verb.to_ascii_lowercase().as_str() {
        "set" => engine.cmd_set(&args),
        "get" => engine.cmd_get(&args),
        "pexpire" => engine.cmd_pexpire(&args),
        "expire" => engine.cmd_expire(&args),
        "bgsave" => engine.cmd_bgsave(&args),
        "select" => engine.cmd_select(&args),
        "rpush" => engine.cmd_rpush(&args),
        "rpop" => engine.cmd_rpop(&args),
        "hset" => engine.cmd_hset(&args),
        "hget" => engine.cmd_hget(&args),
        "hgetall" => engine.cmd_hgetall(&args),
        "sadd" => engine.cmd_sadd(&args),
        "smembers" => engine.cmd_smembers(&args),
        "zadd" => engine.cmd_zadd(&args),
        "zcard" => engine.cmd_zcard(&args),
        "zrange" => engine.cmd_zrange(&args),
        "zcount" => engine.cmd_zcount(&args),
        "zgetall" => engine.cmd_zgetall(&args),
        "ping" => engine.cmd_ping(&args),
        "dbsize" => engine.cmd_dbsize(&args),
        _ => Reply::NotFound("command".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_verb_is_not_found() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-dispatch.kv".to_string(), 1000);
        assert_eq!(
            dispatch(&mut engine, &parse_line("frobnicate a b")),
            Reply::NotFound("command".to_string())
        );
    }

    #[test]
    fn empty_line_is_not_found() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-dispatch2.kv".to_string(), 1000);
        assert_eq!(
            dispatch(&mut engine, &parse_line("")),
            Reply::NotFound("command".to_string())
        );
    }

    #[test]
    fn verb_is_case_insensitive() {
        let mut engine = Engine::new(16, "/tmp/vaultkeep-test-dispatch3.kv".to_string(), 1000);
        assert_eq!(
            dispatch(&mut engine, &parse_line("SET k v")),
            Reply::Ok
        );
        assert_eq!(
            dispatch(&mut engine, &parse_line("GET k")),
            Reply::Payload("v".to_string())
        );
    }
}
