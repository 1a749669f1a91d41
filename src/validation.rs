//! Node id normalisation for operator input.
//!
//! Meshtastic addresses show up as `!a1b2c3d4` in the node db, as `0xA1B2C3D4`
//! in firmware logs and as plain decimal node numbers in some tools. The
//! durable log always stores the `!` form, so CLI filters are mapped onto it.

/// Node id validation errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("Node id is empty")]
    Empty,

    #[error("Node id '{0}' is not a !hex, 0xhex or decimal node number")]
    Unrecognised(String),
}

/// Map any accepted node id form onto the canonical `!xxxxxxxx` address.
pub fn normalize_node_id(input: &str) -> Result<String, NodeIdError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NodeIdError::Empty);
    }

    let parsed = if let Some(hex) = trimmed.strip_prefix('!') {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse::<u32>().ok()
    };

    parsed
        .map(format_node_num)
        .ok_or_else(|| NodeIdError::Unrecognised(trimmed.to_string()))
}

/// Canonical address for a numeric node number.
pub fn format_node_num(num: u32) -> String {
    format!("!{:08x}", num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_address_forms() {
        assert_eq!(normalize_node_id("!A1B2C3D4").unwrap(), "!a1b2c3d4");
        assert_eq!(normalize_node_id("0xa1b2c3d4").unwrap(), "!a1b2c3d4");
        assert_eq!(normalize_node_id(" 2712847316 ").unwrap(), "!a1b2c3d4");
        assert_eq!(normalize_node_id("!abcd").unwrap(), "!0000abcd");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_node_id(""), Err(NodeIdError::Empty));
        assert!(matches!(
            normalize_node_id("!zz"),
            Err(NodeIdError::Unrecognised(_))
        ));
        assert!(matches!(
            normalize_node_id("node-7"),
            Err(NodeIdError::Unrecognised(_))
        ));
    }
}
