//! Log filter composition shared by every front end.
//!
//! Precedence: an explicit `--log-filter` beats verbosity flags, which
//! beat `RUST_LOG`, which beats the built-in default. The noise filter
//! quiets chatty third-party targets, but only when the user did not
//! select a filter themselves.

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "ort=error";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogFilterOptions {
    /// Count of `-v` flags.
    pub verbose: u8,
    /// `--log-filter` value, taken verbatim when present.
    pub explicit_filter: Option<String>,
    /// Captured `RUST_LOG`, if set.
    pub rust_log_env: Option<String>,
}

/// Compose the final tracing env-filter directive string.
pub fn compose_log_filter(options: &LogFilterOptions) -> String {
    let user_filter = select_user_filter(options);
    let implicit = options.explicit_filter.is_none() && options.verbose == 0;
    if implicit {
        format!("{DEFAULT_NOISE_FILTER},{user_filter}")
    } else {
        user_filter
    }
}

fn select_user_filter(options: &LogFilterOptions) -> String {
    if let Some(filter) = options.explicit_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        DEFAULT_LOG_FILTER.to_string()
    }
}
