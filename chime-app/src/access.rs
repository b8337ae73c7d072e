//! Group access enforcement.

use crate::config::{AccessConfig, AccessMode};
use chime_platform::GroupId;

/// Whether the agent may engage in `group` at all. Disallowed groups are
/// dropped before any state is touched, so the engine never learns they
/// exist.
pub fn is_group_allowed(cfg: &AccessConfig, group: &GroupId) -> bool {
    match cfg.mode {
        AccessMode::Open => true,
        AccessMode::Allowlist => cfg
            .allowed_groups
            .iter()
            .any(|allowed| allowed.trim() == group.as_str()),
    }
}
