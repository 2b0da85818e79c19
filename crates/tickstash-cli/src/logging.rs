use tracing_subscriber::EnvFilter;

/// Noisy dependency modules held at `warn` unless RUST_LOG says otherwise.
const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

fn build_filter(log_level: Option<&str>) -> EnvFilter {
    if let Some(level) = log_level {
        return EnvFilter::new(level);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from("info");
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    EnvFilter::new(directives)
}

/// Installs the global subscriber. Logs go to stderr; stdout carries the envelope.
pub fn init(log_level: Option<&str>, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level))
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    if let Err(error) = result {
        eprintln!("warning: logging already initialised: {error}");
    }
}
