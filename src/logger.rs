// src/logger.rs
//
// Tracing subscriber setup for the binary. Library code only emits events.

use tracing_subscriber::{fmt, EnvFilter};

/// Map `-q` / `-v` counts to a default filter directive.
pub fn level_for(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (_, 0) => "unitforge=info,warn",
        (_, 1) => "unitforge=debug,info",
        (_, 2) => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
pub fn init(quiet: bool, verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(quiet, verbose)));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // a second init (tests, embedding) is not an error worth surfacing
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(level_for(true, 3), "error");
        assert_eq!(level_for(false, 0), "unitforge=info,warn");
        assert_eq!(level_for(false, 5), "trace");
    }
}
