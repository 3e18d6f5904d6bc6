//! Panic hook that leaves a crash report behind.
//!
//! A detached daemon has no terminal, so a panic message would otherwise only
//! land in the daemon log. The hook also appends a report (time, pid,
//! thread, location, backtrace) to `crash.log` in the data directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;

/// Install the crash-report hook. Call before anything else in `main`.
pub fn install() {
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    panic::set_hook(Box::new(|info| {
        handle_panic(info);
    }));
}

fn crash_report_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "redictum", "redictum")
        .map(|dirs| dirs.data_dir().join("crash.log"))
}

fn handle_panic(info: &PanicHookInfo) {
    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown".to_string());

    let report = format_crash_report(&location, &panic_message(info.payload()));

    // stderr is the daemon log once detached
    eprintln!("{}", report);

    let Some(path) = crash_report_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = file.write_all(report.as_bytes());
        let _ = file.flush();
        eprintln!("Crash report appended to {}", path.display());
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string payload>".to_string()
    }
}

fn format_crash_report(location: &str, message: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");
    let backtrace = std::backtrace::Backtrace::force_capture();

    format!(
        r"
==================== REDICTUM CRASH REPORT ====================
Time:     {timestamp}
Version:  {version}
PID:      {pid}
Thread:   {thread_name} ({thread_id:?})
Location: {location}
Message:  {message}

Backtrace:
{backtrace}
===============================================================
",
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        thread_id = thread.id(),
    )
}
