//! Apps shipped with the desktop, registered on `AppRegistry::initialize`.

use crate::component::ComponentKind;
use crate::descriptor::{AppDescriptor, SecurityConfig, WindowSize};
use crate::sandbox::IsolationLevel;

pub fn builtin_apps() -> Vec<AppDescriptor> {
    vec![
        AppDescriptor::new("file-explorer", "File Explorer")
            .with_category("System")
            .with_icon("folder")
            .with_description("Browse and manage files")
            .with_size(WindowSize::new(900, 600), WindowSize::new(400, 300))
            .with_security(SecurityConfig {
                permissions: vec!["basic_access".into(), "file_system_access".into()],
                isolation_level: IsolationLevel::High,
                ..Default::default()
            }),
        AppDescriptor::new("terminal", "Terminal")
            .with_kind(ComponentKind::Native)
            .with_category("System")
            .with_icon("terminal")
            .with_description("Command line shell")
            .with_size(WindowSize::new(720, 480), WindowSize::new(400, 240)),
        AppDescriptor::new("text-editor", "Text Editor")
            .with_category("Productivity")
            .with_icon("file-text")
            .with_description("Edit plain text documents")
            .with_permissions(["basic_access", "storage_access"]),
        AppDescriptor::new("calculator", "Calculator")
            .with_category("Utilities")
            .with_icon("calculator")
            .with_description("Basic arithmetic")
            .with_size(WindowSize::new(320, 480), WindowSize::new(280, 400)),
        AppDescriptor::new("settings", "Settings")
            .with_category("System")
            .with_icon("settings")
            .with_description("Desktop preferences")
            .with_permissions(["basic_access", "storage_access", "notifications"]),
        AppDescriptor::new("browser", "Browser")
            .with_kind(ComponentKind::EmbeddedFrame)
            .with_category("Internet")
            .with_icon("globe")
            .with_description("Browse the web")
            .with_url("/apps/browser/index.html")
            .with_size(WindowSize::new(1024, 720), WindowSize::new(480, 320))
            .with_security(SecurityConfig {
                permissions: vec!["basic_access".into(), "network_access".into()],
                isolation_level: IsolationLevel::High,
                ..Default::default()
            }),
    ]
}
