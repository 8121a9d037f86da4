use crate::config::{ShellConfig, WINDOW_TITLE};
use crate::error::ShellError;
use crate::lifecycle::ShellHost;
use tauri::{AppHandle, Manager, WebviewUrl, WebviewWindowBuilder};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};

pub const MAIN_WINDOW: &str = "main";

/// The real window side: one webview window, native dialogs, app exit
pub struct TauriHost {
    app: AppHandle,
    width: f64,
    height: f64,
}

impl TauriHost {
    pub fn new(app: AppHandle, config: &ShellConfig) -> Self {
        Self {
            app,
            width: config.window_width,
            height: config.window_height,
        }
    }
}

impl ShellHost for TauriHost {
    fn load_url(&self, url: &str) -> Result<(), ShellError> {
        let load_failure = |reason: String| ShellError::LoadFailure {
            url: url.to_string(),
            reason,
        };
        let parsed: tauri::Url = url
            .parse()
            .map_err(|e| load_failure(format!("Invalid URL: {}", e)))?;

        // Reuse the window if it already exists
        if let Some(window) = self.app.get_webview_window(MAIN_WINDOW) {
            window
                .navigate(parsed)
                .map_err(|e| load_failure(format!("Failed to navigate: {}", e)))?;
            let _ = window.show();
            log::info!("[Window] Navigating to: {}", url);
            return Ok(());
        }

        WebviewWindowBuilder::new(&self.app, MAIN_WINDOW, WebviewUrl::External(parsed))
            .title(WINDOW_TITLE)
            .inner_size(self.width, self.height)
            .build()
            .map_err(|e| load_failure(format!("Failed to create window: {}", e)))?;

        log::info!("[Window] Created main window at {}", url);
        Ok(())
    }

    fn show_error(&self, title: &str, message: &str) {
        self.app
            .dialog()
            .message(message)
            .title(title)
            .kind(MessageDialogKind::Error)
            .blocking_show();
    }

    fn quit(&self) {
        log::info!("[Window] Exiting application");
        self.app.exit(0);
    }
}
