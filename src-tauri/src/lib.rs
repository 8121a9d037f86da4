pub mod config;
pub mod error;
pub mod event_log;
pub mod host;
pub mod lifecycle;
pub mod locator;
pub mod port;
pub mod process_tree;
pub mod readiness;
pub mod supervisor;

use config::ShellConfig;
use host::TauriHost;
use lifecycle::{LifecycleController, ShellStatus};
use locator::Locator;
use std::sync::Arc;
use tauri::{AppHandle, Manager, RunEvent, State};

/// Current lifecycle state plus the startup log, for the UI's diagnostics view
#[tauri::command]
fn shell_status(controller: State<'_, Arc<LifecycleController>>) -> ShellStatus {
    controller.status()
}

fn build_controller(app: &AppHandle) -> tauri::Result<LifecycleController> {
    let config = ShellConfig::from_env(app.path().app_data_dir()?);
    let mut locator = Locator::new(
        !tauri::is_dev(),
        app.path().resource_dir()?,
        config::project_root(),
    );
    if let Some(command) = config.system_python.clone() {
        locator = locator.with_system_python(command);
    }
    Ok(LifecycleController::new(config, locator))
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            app.handle().plugin(
                tauri_plugin_log::Builder::default()
                    .level(if cfg!(debug_assertions) {
                        log::LevelFilter::Debug
                    } else {
                        log::LevelFilter::Info
                    })
                    .build(),
            )?;

            let controller = Arc::new(build_controller(app.handle())?);
            controller
                .log()
                .record(format!("tauri version: {}", tauri::VERSION));
            app.manage(controller.clone());

            // Startup runs off the event loop; the window appears once the
            // backend answers
            let host = TauriHost::new(app.handle().clone(), controller.config());
            tauri::async_runtime::spawn(async move {
                if controller.start(&host).await.is_ok() {
                    controller.watch_backend(&host).await;
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![shell_status])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(move |app_handle, event| match event {
            // Last window closed, or an explicit quit
            RunEvent::ExitRequested { .. } | RunEvent::Exit => {
                if let Some(controller) = app_handle.try_state::<Arc<LifecycleController>>() {
                    log::info!("App shutting down - stopping backend");
                    controller.shutdown();
                }
            }
            _ => {}
        });
}
