use std::sync::Arc;

use tauri::{AppHandle, Manager};

use crate::{
    app_controller::AppController,
    append_shutdown_log,
    exit_state::{ShutdownPhase, ShutdownTrigger},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitRequestedDecision {
    AllowImmediateExit,
    RunTeardownFirst,
    WaitForTeardown,
}

fn decide_exit_requested_flow(phase: ShutdownPhase) -> ExitRequestedDecision {
    match phase {
        ShutdownPhase::Running | ShutdownPhase::Requested => {
            ExitRequestedDecision::RunTeardownFirst
        }
        ShutdownPhase::TearingDown => ExitRequestedDecision::WaitForTeardown,
        ShutdownPhase::TornDown | ShutdownPhase::Exiting => {
            ExitRequestedDecision::AllowImmediateExit
        }
    }
}

fn controller(app_handle: &AppHandle) -> Option<Arc<AppController>> {
    app_handle
        .try_state::<Arc<AppController>>()
        .map(|state| Arc::clone(state.inner()))
}

/// Holds the exit until the backend and the gateway are down, then exits for
/// real. The second pass goes through once teardown finished.
pub fn handle_exit_requested(app_handle: &AppHandle, api: &tauri::ExitRequestApi) {
    let Some(controller) = controller(app_handle) else {
        return;
    };
    match decide_exit_requested_flow(controller.shutdown_phase()) {
        ExitRequestedDecision::AllowImmediateExit => {
            controller.take_exit_allowance();
            append_shutdown_log("exit request allowed to pass through after teardown");
            return;
        }
        ExitRequestedDecision::WaitForTeardown => {
            api.prevent_exit();
            append_shutdown_log("exit requested while teardown is in progress");
            return;
        }
        ExitRequestedDecision::RunTeardownFirst => {}
    }

    api.prevent_exit();
    controller.request_shutdown();
    append_shutdown_log("exit requested, tearing down asynchronously");
    let app_handle = app_handle.clone();
    tauri::async_runtime::spawn(async move {
        controller.shutdown(ShutdownTrigger::ExitRequested).await;
        app_handle.exit(0);
    });
}

/// Last chance on the way out; a no-op when teardown already ran.
pub fn handle_exit_event(app_handle: &AppHandle) {
    let Some(controller) = controller(app_handle) else {
        return;
    };
    if controller.shutdown_phase() != ShutdownPhase::Running {
        return;
    }

    append_shutdown_log("exit event triggered fallback teardown");
    tauri::async_runtime::block_on(controller.shutdown(ShutdownTrigger::ExitFallback));
}
