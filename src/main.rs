#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    demet_desktop::app_runtime::run();
}
