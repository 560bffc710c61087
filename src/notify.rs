//! Alerts shown to the user shortly before a timer runs out

use std::{fmt::Debug, time::Duration};

use anyhow::{bail, Context, Result};
use log::{debug, info};

/// Something that can show the user an alert later on
///
/// Requests are fire and forget. A failed request is reported to the caller
/// but must never change how a timer counts.
pub trait Notifier: Debug {
    fn schedule(&self, after: Duration, title: &str, body: &str) -> Result<()>;
}

/// Schedules a `notify-send` desktop notification through a transient systemd user timer
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemdNotifier;

impl Notifier for SystemdNotifier {
    fn schedule(&self, after: Duration, title: &str, body: &str) -> Result<()> {
        debug!("Scheduling \"{}\" in {}s", title, after.as_secs());

        let output = std::process::Command::new("systemd-run")
            .args([
                "--user".to_string(),
                format!("--on-active={}", after.as_secs_f32()),
                "--timer-property=AccuracySec=100ms".to_string(),
                "notify-send".to_string(),
                title.to_string(),
                body.to_string(),
            ])
            .output()
            .with_context(|| "Failed to schedule systemd timer")?;

        if !output.status.success() {
            bail!(
                "systemd-run exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

/// Writes alerts to the log instead of showing them
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn schedule(&self, after: Duration, title: &str, body: &str) -> Result<()> {
        info!("In {}s: {} ({})", after.as_secs(), title, body);
        Ok(())
    }
}
