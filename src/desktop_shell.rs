use std::sync::Arc;

use async_trait::async_trait;
use tauri::AppHandle;
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tokio::sync::oneshot;

use crate::{
    app_controller::AppController,
    append_desktop_log, append_shutdown_log,
    exit_state::ShutdownTrigger,
    main_window,
    shell_locale::{self, ShellTexts},
    shell_ui::{Acknowledgement, ShellUi, UpdatePrompt},
};

/// `ShellUi` over the Tauri windows and the dialog plugin.
pub struct TauriShellUi {
    app_handle: AppHandle,
    controller: Arc<AppController>,
    texts: ShellTexts,
}

impl TauriShellUi {
    pub fn new(app_handle: AppHandle, controller: Arc<AppController>, locale: &str) -> Self {
        Self {
            app_handle,
            controller,
            texts: shell_locale::shell_texts_for_locale(locale),
        }
    }

    async fn show_dialog(
        &self,
        title: &str,
        message: String,
        kind: MessageDialogKind,
        buttons: MessageDialogButtons,
    ) -> bool {
        let (answer_tx, answer_rx) = oneshot::channel();
        self.app_handle
            .dialog()
            .message(message)
            .title(title)
            .kind(kind)
            .buttons(buttons)
            .show(move |answer| {
                let _ = answer_tx.send(answer);
            });
        answer_rx.await.unwrap_or(false)
    }
}

#[async_trait]
impl ShellUi for TauriShellUi {
    fn show_loading(&self) {
        main_window::show_loading_window(&self.app_handle, append_desktop_log);
    }

    fn hide_loading(&self) {
        main_window::close_loading_window(&self.app_handle, append_desktop_log);
    }

    fn set_update_progress(&self, percent: Option<u8>) {
        let title = shell_locale::window_title_with_progress(&self.texts, percent);
        main_window::set_main_window_progress(
            &self.app_handle,
            percent,
            &title,
            append_desktop_log,
        );
    }

    async fn confirm_update(&self, prompt: &UpdatePrompt) -> bool {
        let (heading, body) = shell_locale::update_prompt_text(&self.texts, prompt);
        let buttons = if prompt.force_update {
            MessageDialogButtons::OkCustom(self.texts.update_accept.to_string())
        } else {
            MessageDialogButtons::OkCancelCustom(
                self.texts.update_accept.to_string(),
                self.texts.update_decline.to_string(),
            )
        };
        let accepted = self
            .show_dialog(
                self.texts.update_available_title,
                format!("{heading}\n\n{body}"),
                MessageDialogKind::Info,
                buttons,
            )
            .await;
        accepted || prompt.force_update
    }

    async fn acknowledge(&self, acknowledgement: Acknowledgement) {
        let (detail, buttons) = match acknowledgement {
            Acknowledgement::InstallerWillLaunch => (
                self.texts.installer_launch_detail,
                MessageDialogButtons::OkCustom(self.texts.installer_launch_button.to_string()),
            ),
            Acknowledgement::ArchiveApplied => {
                (self.texts.archive_applied_detail, MessageDialogButtons::Ok)
            }
        };
        self.show_dialog(
            self.texts.download_done_title,
            format!("{}\n\n{detail}", self.texts.download_done_message),
            MessageDialogKind::Info,
            buttons,
        )
        .await;
    }

    async fn show_boot_error(&self, detail: &str) {
        self.show_dialog(
            self.texts.boot_error_title,
            shell_locale::boot_error_text(&self.texts, detail),
            MessageDialogKind::Error,
            MessageDialogButtons::Ok,
        )
        .await;
    }

    fn request_exit(&self, code: i32) {
        let app_handle = self.app_handle.clone();
        let controller = Arc::clone(&self.controller);
        tauri::async_runtime::spawn(async move {
            append_shutdown_log(&format!("exit requested by updater: code={code}"));
            controller.shutdown(ShutdownTrigger::UpdateInstall).await;
            app_handle.exit(code);
        });
    }

    fn request_relaunch(&self) {
        let app_handle = self.app_handle.clone();
        let controller = Arc::clone(&self.controller);
        tauri::async_runtime::spawn(async move {
            append_shutdown_log("relaunch requested by updater");
            controller.shutdown(ShutdownTrigger::UpdateRelaunch).await;
            app_handle.restart();
        });
    }
}
