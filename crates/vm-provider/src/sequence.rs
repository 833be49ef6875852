//! VM delete sequence.
//!
//! Teardown runs as ordered steps: a best-effort guest shutdown, a hard
//! power-off if the VM is still running, then removal from inventory. The
//! first failing step aborts the sequence and its error is returned.

use crate::error::ProviderError;
use crate::resources::VirtualMachine;
use crds::VirtualMachinePowerState;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    GuestShutdown,
    PowerOff,
    Destroy,
}

impl DeleteStep {
    pub const ALL: [DeleteStep; 3] = [Self::GuestShutdown, Self::PowerOff, Self::Destroy];

    pub fn name(self) -> &'static str {
        match self {
            Self::GuestShutdown => "guest shutdown",
            Self::PowerOff => "power off",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for DeleteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct DeleteSequence<'a> {
    vm: &'a VirtualMachine,
    shutdown_timeout: Duration,
    poll_interval: Duration,
}

impl<'a> DeleteSequence<'a> {
    /// A zero `shutdown_timeout` skips the graceful shutdown attempt.
    pub fn new(vm: &'a VirtualMachine, shutdown_timeout: Duration) -> Self {
        Self {
            vm,
            shutdown_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn execute(&self) -> Result<(), ProviderError> {
        for step in DeleteStep::ALL {
            debug!("Running delete step {} for VM {}", step, self.vm.name());
            self.run(step).await.map_err(|source| ProviderError::SequenceStep {
                step: step.name(),
                source: Box::new(source),
            })?;
        }
        info!("Deleted VM {}", self.vm.name());
        Ok(())
    }

    async fn run(&self, step: DeleteStep) -> Result<(), ProviderError> {
        match step {
            DeleteStep::GuestShutdown => self.shutdown_guest().await,
            DeleteStep::PowerOff => {
                if self.vm.power_state().await? == VirtualMachinePowerState::PoweredOff {
                    return Ok(());
                }
                self.vm.set_power_state(VirtualMachinePowerState::PoweredOff).await
            }
            DeleteStep::Destroy => self.vm.destroy().await,
        }
    }

    /// Ask the guest to shut down and wait for it, bounded by the shutdown
    /// timeout. Only failing to read the VM fails this step.
    async fn shutdown_guest(&self) -> Result<(), ProviderError> {
        if self.shutdown_timeout.is_zero() {
            return Ok(());
        }
        if self.vm.power_state().await? != VirtualMachinePowerState::PoweredOn {
            return Ok(());
        }
        if let Err(e) = self.vm.shutdown_guest().await {
            warn!("Graceful shutdown of VM {} unavailable, powering off: {}", self.vm.name(), e);
            return Ok(());
        }

        let wait = async {
            loop {
                if self.vm.power_state().await? == VirtualMachinePowerState::PoweredOff {
                    return Ok::<(), ProviderError>(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.shutdown_timeout, wait).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    "VM {} did not shut down within {:?}, powering off",
                    self.vm.name(),
                    self.shutdown_timeout
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vsphere_client::{MockOperation, MockVSphereClient, PowerState};

    fn powered_on_vm(mock: &MockVSphereClient, tools_running: bool) -> VirtualMachine {
        let reference = mock.add_vm("web", Vec::new());
        mock.update_vm(&reference, |vm| {
            vm.power_state = PowerState::PoweredOn;
            vm.tools_running = tools_running;
        });
        VirtualMachine::new("web", reference, Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn graceful_shutdown_skips_hard_power_off() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = powered_on_vm(&mock, true);

        DeleteSequence::new(&vm, Duration::from_secs(1)).execute().await.unwrap();
        assert_eq!(mock.calls(MockOperation::ShutdownGuest), 1);
        assert_eq!(mock.calls(MockOperation::PowerOff), 0);
        assert_eq!(mock.vm_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_power_off_without_tools() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = powered_on_vm(&mock, false);

        DeleteSequence::new(&vm, Duration::from_secs(1)).execute().await.unwrap();
        assert_eq!(mock.calls(MockOperation::PowerOff), 1);
        assert_eq!(mock.vm_count(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_disables_graceful_shutdown() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = powered_on_vm(&mock, true);

        DeleteSequence::new(&vm, Duration::ZERO).execute().await.unwrap();
        assert_eq!(mock.calls(MockOperation::ShutdownGuest), 0);
        assert_eq!(mock.calls(MockOperation::PowerOff), 1);
    }

    #[tokio::test]
    async fn failing_step_aborts_remaining_steps() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = powered_on_vm(&mock, false);
        mock.fail(MockOperation::PowerOff, "InvalidPowerState");

        let err = DeleteSequence::new(&vm, Duration::ZERO).execute().await.unwrap_err();
        assert!(matches!(err, ProviderError::SequenceStep { step: "power off", .. }));
        assert_eq!(mock.calls(MockOperation::DestroyVm), 0);
        assert_eq!(mock.vm_count(), 1);
    }

    #[tokio::test]
    async fn vanished_vm_surfaces_as_not_found() {
        let mock = MockVSphereClient::new("https://vc.test");
        let vm = powered_on_vm(&mock, false);
        mock.update_vm(vm.reference(), |v| v.power_state = PowerState::PoweredOff);
        let reference = vm.reference().clone();
        let stale = VirtualMachine::new("web", reference, Arc::new(mock.clone()));
        DeleteSequence::new(&vm, Duration::ZERO).execute().await.unwrap();

        let err = DeleteSequence::new(&stale, Duration::ZERO).execute().await.unwrap_err();
        assert!(err.is_not_found());
    }
}
