pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use lazy_static::lazy_static;
use sloggers::{Config, LoggerConfig};

lazy_static! {
    static ref ROOT: Logger = build_root();
}

fn build_root() -> Logger {
    let config: Result<LoggerConfig, _> = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    );

    config
        .ok()
        .and_then(|c| c.build_logger().ok())
        .unwrap_or_else(discard)
}

/// The library's shared root logger (terminal, stderr).
pub fn root() -> Logger {
    ROOT.new(o!())
}

/// Logger selected by the tag `debug` attribute: silent at 0, the shared
/// root otherwise.
pub fn for_debug(debug: i64) -> Logger {
    if debug > 0 {
        root()
    } else {
        discard()
    }
}

pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
