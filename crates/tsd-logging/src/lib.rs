//! ---
//! tsd_section: "03-logging"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Step-scoped structured logging helpers."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
#![warn(missing_docs)]
//! Structured logging context for deployment steps.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber for tests and ad hoc tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Deployment target, usually the compose project name.
    pub target: Option<&'a str>,
    /// Service the event concerns.
    pub service: Option<&'a str>,
    /// Pipeline step or operation name.
    pub step: Option<&'a str>,
    /// Attempt number for retried work.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the deployment target.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a service name.
    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }

    /// Attach a step name.
    pub fn with_step(mut self, step: &'a str) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach an attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed with a non-fatal problem.
    Warning,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    /// Lowercase label used as the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Warning => "warning",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with an outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    match outcome {
        SystemEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
        SystemEventOutcome::Warning => tracing::warn!(
            event,
            outcome = outcome.as_str(),
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new().with_target("familyhub").with_step("migrate");
        tsd_info!(context = ctx.clone(), "step started");
        tsd_warn!(context = ctx.clone().with_attempt(2), "retrying step");
        tsd_debug!("debug message");
        tsd_error!(context = ctx, "exit code: {}", 1);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_service("db");
        log_system_event(
            Some(&ctx),
            "backup.created",
            "backup artifact written",
            SystemEventOutcome::Success,
        );
        log_system_event(None, "cache_table", "skipped", SystemEventOutcome::Warning);
        log_system_event(None, "deploy", "aborted", SystemEventOutcome::Fault);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(SystemEventOutcome::Warning.as_str(), "warning");
    }
}
