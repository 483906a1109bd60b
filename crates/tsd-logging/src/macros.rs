//! ---
//! tsd_section: "03-logging"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Step-scoped structured logging helpers."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
/// Emit an informational log enriched with deployment context.
#[macro_export]
macro_rules! tsd_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::INFO,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with deployment context.
#[macro_export]
macro_rules! tsd_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::DEBUG,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning enriched with deployment context.
#[macro_export]
macro_rules! tsd_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::WARN,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with deployment context.
#[macro_export]
macro_rules! tsd_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::ERROR,
            target_name = ctx.target.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}
