use chrono::Utc;
use rand::Rng;

use crate::db_types::OrderNo;

/// Generates a new public order number: `C` followed by the current timestamp and a 4-digit random
/// suffix, e.g. `C202608291430220417`. The suffix keeps numbers distinct when several orders land in
/// the same second; the database enforces uniqueness regardless.
pub fn generate_order_no() -> OrderNo {
    let ts = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = rand::thread_rng().gen_range(0..10_000u32);
    OrderNo(format!("C{ts}{suffix:04}"))
}

/// Generates a new settlement id: `PAY` followed by the current epoch milliseconds and a 6-character
/// random alphanumeric suffix, e.g. `PAY1756476622812x7k2pq`.
pub fn generate_settlement_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect();
    format!("PAY{}{suffix}", Utc::now().timestamp_millis())
}
