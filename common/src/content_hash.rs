use sha2::{Digest, Sha256};

/// SHA-256 of the file content as lowercase hex.
pub fn sha256_hex(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    format!("{:x}", hash)
}

/// Whether `hash` appears in the deny list. Entries are compared case-insensitively.
pub fn is_denied(hash: &str, deny_list: &[String]) -> bool {
    deny_list
        .iter()
        .any(|entry| entry.trim().eq_ignore_ascii_case(hash))
}
