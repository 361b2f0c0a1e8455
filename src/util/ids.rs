//! Key and identity generation.

use uuid::Uuid;

/// Prefix of task descriptor and schedule entry keys.
pub const TASK_KEY_PREFIX: &str = "task_";

/// Fresh task key, e.g. `task_3f2a...`.
#[must_use]
pub fn new_task_key() -> String {
    format!("{TASK_KEY_PREFIX}{}", Uuid::new_v4().simple())
}

/// Fresh queued-stage key under `prefix`, e.g. `pool/task_3f2a...`.
#[must_use]
pub fn new_stage_key(prefix: &str) -> String {
    format!("{prefix}{}", new_task_key())
}

/// Identity of one runner instance: process id plus a random suffix so two
/// runners inside one process never share an identity.
#[must_use]
pub fn runner_identity() -> String {
    format!("{}-{}", std::process::id(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique_and_prefixed() {
        let a = new_task_key();
        let b = new_task_key();
        assert_ne!(a, b);
        assert!(a.starts_with(TASK_KEY_PREFIX));
        assert!(new_stage_key("pool/").starts_with("pool/task_"));
    }

    #[test]
    fn test_identity_carries_pid() {
        let id = runner_identity();
        assert!(id.starts_with(&format!("{}-", std::process::id())));
        assert_ne!(id, runner_identity());
    }
}
