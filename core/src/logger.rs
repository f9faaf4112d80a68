use std::io::Write;
use std::time::Instant;

use log::info;
use once_cell::sync::Lazy;

/// Returns the init [`Instant`]
pub static INIT_INSTANT: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the seconds since [`INIT_INSTANT`].
pub fn uptime() -> u64 {
    INIT_INSTANT.elapsed().as_secs()
}

/// Initializes console logging via [`log`]/[`env_logger`].
///
/// If `RUST_LOG` is already set it is left alone; otherwise `filter` applies
/// to `loopsmith` crates only, `rust_log_override` lets callers (tests) force
/// a specific value instead.
///
/// # Panics
///
/// This must only be called once.
pub fn init_logger(filter: log::LevelFilter, rust_log_override: Option<&str>) {
    let now = Lazy::force(&INIT_INSTANT);

    let env = if let Some(over) = rust_log_override {
        std::env::set_var("RUST_LOG", over);
        over.to_owned()
    } else {
        match std::env::var("RUST_LOG") {
            Ok(e) => {
                std::env::set_var("RUST_LOG", &e);
                e
            }
            Err(_) => {
                let default = format!("off,loopsmith_core={filter},loopsmith_analysis={filter}");
                std::env::set_var("RUST_LOG", &default);
                String::new()
            }
        }
    };

    env_logger::Builder::new()
        .format(move |buf, record| {
            let mut style = buf.style();
            let level = match record.level() {
                log::Level::Debug => {
                    style.set_color(env_logger::fmt::Color::Blue);
                    "D"
                }
                log::Level::Trace => {
                    style.set_color(env_logger::fmt::Color::Magenta);
                    "T"
                }
                log::Level::Info => {
                    style.set_color(env_logger::fmt::Color::White);
                    "I"
                }
                log::Level::Warn => {
                    style.set_color(env_logger::fmt::Color::Yellow);
                    "W"
                }
                log::Level::Error => {
                    style.set_color(env_logger::fmt::Color::Red);
                    "E"
                }
            };
            writeln!(
                buf,
                "| {} | {: >9.3} | {: >35} @ {: <3} | {}",
                style.set_bold(true).value(level),
                buf.style()
                    .set_dimmed(true)
                    .value(now.elapsed().as_secs_f32()),
                buf.style()
                    .set_dimmed(true)
                    .value(record.file_static().unwrap_or("???")),
                buf.style()
                    .set_dimmed(true)
                    .value(record.line().unwrap_or(0)),
                record.args(),
            )
        })
        .write_style(env_logger::WriteStyle::Always)
        .parse_default_env()
        .init();

    if env.is_empty() {
        info!("Log Level (Flag) ... {filter}");
    } else {
        info!("Log Level (RUST_LOG) ... {env}");
    }
}

/// Builds (but does not install) the `tracing` subscriber used for
/// `#[instrument]` spans on the playback engine's command boundaries.
#[must_use]
pub fn init_tracing() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .finish()
}
