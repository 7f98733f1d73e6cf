use std::io::Write;

use chrono::Utc;
use log::{info, LevelFilter};

/// Install the process-wide logger. `RUST_LOG` wins over `level` when set.
pub fn init(level: &str) {
    let filter = parse_level(level);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(filter).parse_default_env().format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{}] [{}:{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        )
    });
    // a second init (tests, embedding) keeps the first logger
    if builder.try_init().is_ok() {
        info!("Logger initialized at {}", filter);
    }
}

pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }
}
