use tracing_subscriber::EnvFilter;

/// HTTP stack internals stay at `warn` unless `RUST_LOG` says otherwise; they
/// would otherwise log request details around the login form.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "cookie_store=warn"];

pub fn init_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    // CLI output goes to stdout, so logs stay on stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_ascii_lowercase()];
    if !matches!(directives[0].as_str(), "trace" | "debug") {
        return directives.remove(0);
    }
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_levels_quiet_http_internals() {
        assert_eq!(default_directives("info"), "info");
        assert_eq!(default_directives(" WARN "), "warn");
        let debug = default_directives("debug");
        assert!(debug.starts_with("debug,"));
        assert!(debug.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&debug).is_ok());
    }
}
