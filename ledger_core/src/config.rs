use ledger_pb::ReplicaID;

/// Read a line-oriented config file of `ip:port` entries, one per replica, skipping blank lines
/// and `#`-prefixed comments.  `self_id` is filtered out of the returned peer set, matching the
/// spec's "self-entries are filtered out" rule.
pub fn read_membership(contents: &str, self_id: ReplicaID) -> Result<Vec<ReplicaID>, String> {
    let mut peers = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let id: ReplicaID = line
            .parse()
            .map_err(|err| format!("config line {}: {err}", lineno + 1))?;
        if id != self_id {
            peers.push(id);
        }
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_is_filtered_and_comments_are_skipped() {
        let contents = "\
# three replicas
127.0.0.1:9001
127.0.0.1:9002

127.0.0.1:9003
";
        let peers = read_membership(contents, "127.0.0.1:9002".parse().unwrap()).unwrap();
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains(&"127.0.0.1:9002".parse().unwrap()));
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(read_membership("not-a-host-port", "127.0.0.1:1".parse().unwrap()).is_err());
    }
}
