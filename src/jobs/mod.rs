//! Task types and the worker registry.

pub mod expiry_sweep;
pub mod invitation_send;
pub mod tenant_init;

use crate::queue::scheduler::ScheduledTask;
use crate::queue::worker::Registry;

pub const TENANT_INITIALIZE: &str = "tenant.initialize";
pub const INVITATION_SEND: &str = "invitation.send";
pub const SYSTEM_USER_EXPIRY_SWEEP: &str = "system_user.expiry_sweep";

/// Credential expiry is re-checked hourly.
const EXPIRY_SWEEP_CRON: &str = "0 0 * * * *";

pub fn registry() -> Registry {
    Registry::new()
        .register(TENANT_INITIALIZE, tenant_init::handle)
        .register(INVITATION_SEND, invitation_send::handle)
        .register(SYSTEM_USER_EXPIRY_SWEEP, expiry_sweep::handle)
}

pub fn schedules() -> anyhow::Result<Vec<ScheduledTask>> {
    Ok(vec![ScheduledTask::new(
        EXPIRY_SWEEP_CRON,
        SYSTEM_USER_EXPIRY_SWEEP,
        serde_json::json!({}),
    )?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_sweep_schedule_parses() {
        let schedules = schedules().unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].task_type, SYSTEM_USER_EXPIRY_SWEEP);
    }
}
