//! Save policy: which exchanges get written.

use crate::config::SaveMode;

/// Decide whether an exchange is persisted.
pub fn should_persist(mode: SaveMode, has_broadcast: bool) -> bool {
    match mode {
        SaveMode::None => false,
        SaveMode::All => true,
        SaveMode::Broadcast => has_broadcast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        assert!(!should_persist(SaveMode::None, true));
        assert!(!should_persist(SaveMode::None, false));
        assert!(should_persist(SaveMode::All, false));
        assert!(should_persist(SaveMode::All, true));
        assert!(!should_persist(SaveMode::Broadcast, false));
        assert!(should_persist(SaveMode::Broadcast, true));
    }
}
