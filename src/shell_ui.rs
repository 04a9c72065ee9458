use async_trait::async_trait;

/// What the user is asked before an update is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePrompt {
    pub current_version: String,
    pub target_version: String,
    pub size_bytes: u64,
    pub changelog_preview: String,
    /// Removes the decline option.
    pub force_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    InstallerWillLaunch,
    ArchiveApplied,
}

/// Window-facing side effects the supervisor and updater need. The desktop
/// build implements this over Tauri windows and dialogs.
#[async_trait]
pub trait ShellUi: Send + Sync {
    fn show_loading(&self);
    fn hide_loading(&self);
    /// Progress bar plus window-title suffix; `None` clears both.
    fn set_update_progress(&self, percent: Option<u8>);
    async fn confirm_update(&self, prompt: &UpdatePrompt) -> bool;
    async fn acknowledge(&self, acknowledgement: Acknowledgement);
    async fn show_boot_error(&self, detail: &str);
    fn request_exit(&self, code: i32);
    fn request_relaunch(&self);
}

/// Keeps the loading indicator visible for its lifetime.
pub struct LoadingGuard<'a> {
    ui: &'a dyn ShellUi,
}

impl<'a> LoadingGuard<'a> {
    pub fn show(ui: &'a dyn ShellUi) -> Self {
        ui.show_loading();
        Self { ui }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.ui.hide_loading();
    }
}

/// Clears window-chrome progress when dropped, on success and failure alike.
pub struct UpdateProgressGuard<'a> {
    ui: &'a dyn ShellUi,
}

impl<'a> UpdateProgressGuard<'a> {
    pub fn new(ui: &'a dyn ShellUi) -> Self {
        Self { ui }
    }
}

impl Drop for UpdateProgressGuard<'_> {
    fn drop(&mut self) {
        self.ui.set_update_progress(None);
    }
}
