use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the snowflake generator with explicit machine/node identifiers
/// (each 0-31). Call once at process start; `next_id` falls back to (1, 1)
/// when initialization was skipped.
pub fn init(machine_id: i32, node_id: i32) {
    let mut guard = ID_GENERATOR.lock().unwrap();
    *guard = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Produce a process-unique snowflake id, stringified for document keys.
pub fn next_id() -> String {
    let mut guard = ID_GENERATOR.lock().unwrap();
    let bucket = guard.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        init(2, 3);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = next_id();
            assert!(!id.is_empty());
            assert!(seen.insert(id), "duplicate id generated");
        }
    }
}
