use rand::Rng;

pub const REPLICATION_ID_LEN: usize = 40;

/// A random 40 character hex string, the same shape Redis uses for replication ids.
pub fn generate_replication_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..REPLICATION_ID_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}
