//! Server-assigned identifiers.
//!
//! Message and row ids are UUID v7: time-sortable with millisecond
//! precision, unique across instances without coordination. The per-device
//! ordering guarantee leans on this — ids assigned by one instance sort in
//! assignment order.

use uuid::Uuid;

/// Generate a new time-sortable id.
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

/// Extract the embedded creation timestamp from a UUID v7.
pub fn extract_timestamp(id: Uuid) -> Option<chrono::DateTime<chrono::Utc>> {
    let bytes = id.as_bytes();
    // UUID v7: first 48 bits are a millisecond Unix timestamp
    let ms = ((bytes[0] as u64) << 40)
        | ((bytes[1] as u64) << 32)
        | ((bytes[2] as u64) << 24)
        | ((bytes[3] as u64) << 16)
        | ((bytes[4] as u64) << 8)
        | (bytes[5] as u64);

    chrono::DateTime::from_timestamp_millis(ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn ids_sort_by_assignment_order() {
        let first = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_id();
        assert!(first < second);
    }

    #[test]
    fn embedded_timestamp_is_close_to_now() {
        let before = chrono::Utc::now();
        let id = generate_id();
        let after = chrono::Utc::now();

        let ts = extract_timestamp(id).expect("v7 id carries a timestamp");
        assert!(ts >= before - chrono::Duration::milliseconds(1));
        assert!(ts <= after + chrono::Duration::milliseconds(1));
    }
}
