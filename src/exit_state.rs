/// Why the shell is tearing down. Only used for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    WindowClosed,
    ExitRequested,
    ExitFallback,
    UpdateInstall,
    UpdateRelaunch,
    BootFailure,
    Panic,
}

impl ShutdownTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WindowClosed => "window-closed",
            Self::ExitRequested => "exit-requested",
            Self::ExitFallback => "exit-fallback",
            Self::UpdateInstall => "update-install",
            Self::UpdateRelaunch => "update-relaunch",
            Self::BootFailure => "boot-failure",
            Self::Panic => "panic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPhase {
    #[default]
    Running,
    Requested,
    TearingDown,
    TornDown,
    Exiting,
}

/// Teardown runs at most once no matter how many exit paths fire; a second
/// request while tearing down or after it finished is a no-op.
#[derive(Debug, Default)]
pub struct ShutdownMachine {
    phase: ShutdownPhase,
}

impl ShutdownMachine {
    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase != ShutdownPhase::Running
    }

    pub fn request(&mut self) {
        if self.phase == ShutdownPhase::Running {
            self.phase = ShutdownPhase::Requested;
        }
    }

    pub fn try_begin_teardown(&mut self) -> bool {
        if matches!(self.phase, ShutdownPhase::Running | ShutdownPhase::Requested) {
            self.phase = ShutdownPhase::TearingDown;
            return true;
        }
        false
    }

    pub fn finish_teardown(&mut self) {
        if self.phase == ShutdownPhase::TearingDown {
            self.phase = ShutdownPhase::TornDown;
        }
    }

    /// True exactly once after teardown finished: the next exit request may
    /// pass straight through.
    pub fn take_exit_allowance(&mut self) -> bool {
        if self.phase == ShutdownPhase::TornDown {
            self.phase = ShutdownPhase::Exiting;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_flows_from_request_to_exit() {
        let mut machine = ShutdownMachine::default();
        assert!(!machine.is_shutting_down());

        machine.request();
        assert_eq!(machine.phase(), ShutdownPhase::Requested);
        assert!(!machine.take_exit_allowance());

        assert!(machine.try_begin_teardown());
        assert_eq!(machine.phase(), ShutdownPhase::TearingDown);

        machine.finish_teardown();
        assert!(machine.take_exit_allowance());
        assert_eq!(machine.phase(), ShutdownPhase::Exiting);
        assert!(!machine.take_exit_allowance());
    }

    #[test]
    fn second_teardown_is_rejected() {
        let mut machine = ShutdownMachine::default();
        assert!(machine.try_begin_teardown());
        assert!(!machine.try_begin_teardown());
        machine.finish_teardown();
        assert!(!machine.try_begin_teardown());
    }

    #[test]
    fn late_request_does_not_rewind_phase() {
        let mut machine = ShutdownMachine::default();
        assert!(machine.try_begin_teardown());
        machine.request();
        assert_eq!(machine.phase(), ShutdownPhase::TearingDown);
        machine.finish_teardown();
        machine.request();
        assert_eq!(machine.phase(), ShutdownPhase::TornDown);
    }

    #[test]
    fn trigger_labels_are_stable() {
        assert_eq!(ShutdownTrigger::WindowClosed.as_str(), "window-closed");
        assert_eq!(ShutdownTrigger::Panic.as_str(), "panic");
    }
}
