use crate::error::{Result, VaultError};
use crate::tree::NodeKind;

/// Reject names that can't live in a single directory entry.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.trim().is_empty() {
        return Err(VaultError::InvalidInput("name must not be empty".into()));
    }
    if name == "." || name == ".." {
        return Err(VaultError::InvalidInput(format!("'{name}' is reserved")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(VaultError::InvalidInput(format!(
            "name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

/// The `n`th alternative for `name`: `report (2).pdf`, `photos (2)`.
///
/// Files keep their extension after the suffix. A leading dot is not an
/// extension separator, so `.bashrc` becomes `.bashrc (1)`.
pub(crate) fn numbered(name: &str, kind: NodeKind, n: u32) -> String {
    if kind == NodeKind::File {
        if let Some(idx) = name.rfind('.').filter(|&idx| idx > 0) {
            let (base, ext) = name.split_at(idx);
            return format!("{base} ({n}){ext}");
        }
    }
    format!("{name} ({n})")
}
