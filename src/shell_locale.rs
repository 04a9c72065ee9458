use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};

use crate::{shell_ui::UpdatePrompt, APP_DISPLAY_NAME, APP_ROOT_ENV};

const LOCALE_FIELD: &str = "locale";
const DESKTOP_STATE_FILE: &str = "desktop_state.json";
const LOCALE_ENV: &str = "DEMET_DESKTOP_LOCALE";

fn empty_state_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, Copy)]
pub struct ShellTexts {
    pub boot_error_title: &'static str,
    pub boot_error_intro: &'static str,
    pub boot_error_hint: &'static str,
    pub loading_message: &'static str,
    pub update_available_title: &'static str,
    pub new_version_label: &'static str,
    pub current_version_label: &'static str,
    pub size_label: &'static str,
    pub changelog_label: &'static str,
    pub update_accept: &'static str,
    pub update_decline: &'static str,
    pub download_done_title: &'static str,
    pub download_done_message: &'static str,
    pub installer_launch_detail: &'static str,
    pub installer_launch_button: &'static str,
    pub archive_applied_detail: &'static str,
    pub updating_title_suffix: &'static str,
}

pub fn shell_texts_for_locale(locale: &str) -> ShellTexts {
    if locale == "en-US" {
        return ShellTexts {
            boot_error_title: "Demet - Startup Error",
            boot_error_intro: "The application could not be started.",
            boot_error_hint: "Make sure the backend and its required packages are installed.",
            loading_message: "Starting, please wait...",
            update_available_title: "Update Available",
            new_version_label: "New version",
            current_version_label: "Current version",
            size_label: "Size",
            changelog_label: "Changes",
            update_accept: "Update",
            update_decline: "Later",
            download_done_title: "Download Complete",
            download_done_message: "The update has been downloaded!",
            installer_launch_detail: "Setup will start now. The application will close.",
            installer_launch_button: "Start Setup",
            archive_applied_detail: "The update was applied. The application will restart.",
            updating_title_suffix: "Updating",
        };
    }

    ShellTexts {
        boot_error_title: "Demet - Başlatma Hatası",
        boot_error_intro: "Uygulama başlatılamadı.",
        boot_error_hint: "Backend ve gereken paketlerin kurulu olduğundan emin olun.",
        loading_message: "Başlatılıyor, lütfen bekleyin...",
        update_available_title: "Güncelleme Mevcut",
        new_version_label: "Yeni sürüm",
        current_version_label: "Mevcut sürüm",
        size_label: "Boyut",
        changelog_label: "Değişiklikler",
        update_accept: "Güncelle",
        update_decline: "Sonra",
        download_done_title: "İndirme Tamamlandı",
        download_done_message: "Güncelleme indirildi!",
        installer_launch_detail: "Şimdi kurulum başlatılacak. Uygulama kapanacak.",
        installer_launch_button: "Kurulumu Başlat",
        archive_applied_detail: "Güncelleme uygulandı. Uygulama yeniden başlatılacak.",
        updating_title_suffix: "Güncelleniyor",
    }
}

/// Heading and body of the update confirmation dialog.
pub fn update_prompt_text(texts: &ShellTexts, prompt: &UpdatePrompt) -> (String, String) {
    let heading = format!("{}: v{}", texts.new_version_label, prompt.target_version);
    let mut body = format!(
        "{}: v{}",
        texts.current_version_label, prompt.current_version
    );
    if prompt.size_bytes > 0 {
        let size_mb = (prompt.size_bytes as f64 / 1024.0 / 1024.0).round();
        body.push_str(&format!("\n{}: ~{size_mb:.0} MB", texts.size_label));
    }
    if !prompt.changelog_preview.is_empty() {
        body.push_str(&format!(
            "\n\n{}:\n{}",
            texts.changelog_label, prompt.changelog_preview
        ));
    }
    (heading, body)
}

pub fn window_title_with_progress(texts: &ShellTexts, percent: Option<u8>) -> String {
    match percent {
        Some(percent) => format!(
            "{APP_DISPLAY_NAME} - {} %{percent}",
            texts.updating_title_suffix
        ),
        None => APP_DISPLAY_NAME.to_string(),
    }
}

pub fn boot_error_text(texts: &ShellTexts, detail: &str) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        texts.boot_error_intro, detail, texts.boot_error_hint
    )
}

pub fn resolve_shell_locale(
    default_shell_locale: &'static str,
    app_root_dir: Option<PathBuf>,
) -> &'static str {
    if let Some(locale) = read_cached_shell_locale(app_root_dir.as_deref()) {
        return locale;
    }

    for env_key in [LOCALE_ENV, "LC_ALL", "LANG"] {
        if let Ok(value) = env::var(env_key) {
            if let Some(locale) = normalize_shell_locale(&value) {
                return locale;
            }
        }
    }

    default_shell_locale
}

pub fn normalize_shell_locale(raw: &str) -> Option<&'static str> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw == "tr-TR" {
        return Some("tr-TR");
    }
    if raw == "en-US" {
        return Some("en-US");
    }

    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("tr") {
        return Some("tr-TR");
    }
    if lowered.starts_with("en") {
        return Some("en-US");
    }
    None
}

fn desktop_state_path(app_root_dir: Option<&Path>) -> Option<PathBuf> {
    if let Ok(root) = env::var(APP_ROOT_ENV) {
        let path = PathBuf::from(root.trim());
        if !path.as_os_str().is_empty() {
            return Some(path.join(DESKTOP_STATE_FILE));
        }
    }

    app_root_dir.map(|root| root.join(DESKTOP_STATE_FILE))
}

fn read_cached_shell_locale(app_root_dir: Option<&Path>) -> Option<&'static str> {
    let state_path = desktop_state_path(app_root_dir)?;
    let raw = fs::read_to_string(state_path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    let locale = parsed.get(LOCALE_FIELD)?.as_str()?;
    normalize_shell_locale(locale)
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = empty_state_object();
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just normalized into a JSON object"),
    }
}

pub fn write_cached_shell_locale<F>(
    locale: Option<&str>,
    app_root_dir: Option<&Path>,
    log: F,
) -> Result<(), String>
where
    F: Fn(&str),
{
    let normalized_locale = locale.and_then(normalize_shell_locale);
    if let Some(raw_locale) = locale {
        if normalized_locale.is_none() {
            log(&format!(
                "unsupported shell locale '{}'; clearing cached locale",
                raw_locale
            ));
        }
    }

    let Some(state_path) = desktop_state_path(app_root_dir) else {
        log("shell locale state path is unavailable; skipping locale persistence");
        return Ok(());
    };

    if let Some(parent_dir) = state_path.parent() {
        fs::create_dir_all(parent_dir).map_err(|error| {
            format!(
                "Failed to create shell locale directory {}: {}",
                parent_dir.display(),
                error
            )
        })?;
    }

    let mut parsed = match fs::read_to_string(&state_path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(error) => {
                log(&format!(
                    "failed to parse shell locale state {}: {}. resetting state file",
                    state_path.display(),
                    error
                ));
                empty_state_object()
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => empty_state_object(),
        Err(error) => {
            return Err(format!(
                "Failed to read shell locale state {}: {}",
                state_path.display(),
                error
            ));
        }
    };
    let object = ensure_object(&mut parsed);

    if let Some(normalized_locale) = normalized_locale {
        object.insert(
            LOCALE_FIELD.to_string(),
            Value::String(normalized_locale.to_string()),
        );
    } else {
        object.remove(LOCALE_FIELD);
    }

    let serialized = serde_json::to_string_pretty(&parsed)
        .map_err(|error| format!("Failed to serialize shell locale state: {error}"))?;
    fs::write(&state_path, serialized).map_err(|error| {
        format!(
            "Failed to write shell locale state {}: {}",
            state_path.display(),
            error
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_prompt() -> UpdatePrompt {
        UpdatePrompt {
            current_version: "1.0.0".to_string(),
            target_version: "1.2.0".to_string(),
            size_bytes: 84 * 1024 * 1024,
            changelog_preview: "Hesap listesi hızlandı".to_string(),
            force_update: false,
        }
    }

    #[test]
    fn shell_texts_for_locale_returns_english_copy() {
        let texts = shell_texts_for_locale("en-US");
        assert_eq!(texts.update_accept, "Update");
        assert_eq!(texts.update_decline, "Later");
    }

    #[test]
    fn shell_texts_for_locale_falls_back_to_turkish_copy() {
        let texts = shell_texts_for_locale("de-DE");
        assert_eq!(texts.update_accept, "Güncelle");
        assert_eq!(texts.update_available_title, "Güncelleme Mevcut");
    }

    #[test]
    fn normalize_shell_locale_accepts_language_prefixes() {
        assert_eq!(normalize_shell_locale("EN_us"), Some("en-US"));
        assert_eq!(normalize_shell_locale("tr_TR.UTF-8"), Some("tr-TR"));
        assert_eq!(normalize_shell_locale("fr-FR"), None);
    }

    #[test]
    fn update_prompt_text_lists_version_size_and_changelog() {
        let texts = shell_texts_for_locale("tr-TR");
        let (heading, body) = update_prompt_text(&texts, &sample_prompt());
        assert_eq!(heading, "Yeni sürüm: v1.2.0");
        assert!(body.starts_with("Mevcut sürüm: v1.0.0"));
        assert!(body.contains("Boyut: ~84 MB"));
        assert!(body.ends_with("Değişiklikler:\nHesap listesi hızlandı"));
    }

    #[test]
    fn update_prompt_text_omits_unknown_size() {
        let texts = shell_texts_for_locale("en-US");
        let mut prompt = sample_prompt();
        prompt.size_bytes = 0;
        prompt.changelog_preview.clear();
        let (_, body) = update_prompt_text(&texts, &prompt);
        assert_eq!(body, "Current version: v1.0.0");
    }

    #[test]
    fn window_title_shows_progress_percent() {
        let texts = shell_texts_for_locale("tr-TR");
        assert_eq!(
            window_title_with_progress(&texts, Some(42)),
            "Demet - Güncelleniyor %42"
        );
        assert_eq!(window_title_with_progress(&texts, None), "Demet");
    }

    #[test]
    fn cached_locale_round_trips_through_state_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        write_cached_shell_locale(Some("en_GB"), Some(dir.path()), |_| {})
            .expect("write locale");
        assert_eq!(read_cached_shell_locale(Some(dir.path())), Some("en-US"));

        write_cached_shell_locale(None, Some(dir.path()), |_| {}).expect("clear locale");
        assert_eq!(read_cached_shell_locale(Some(dir.path())), None);
    }
}
