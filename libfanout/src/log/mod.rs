//! Simple re-export of logging-related macros, plus the shared error hook and
//! verbosity mapping used by the binaries.
pub use color_eyre::eyre::eyre;
pub use tracing::level_filters::LevelFilter;
pub use tracing::{debug, error, info, span, trace, warn};

/// Install color_eyre as the global error handler.
#[tracing::instrument]
pub fn install_color_eyre() -> color_eyre::eyre::Result<()> {
    color_eyre::config::HookBuilder::default()
        .issue_url(concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new"))
        .add_default_filters()
        .add_frame_filter(Box::new(|frames| {
            let filters = &[
                "tokio::",
                "tracing::",
                "color_eyre::",
                "thrussh::",
                "futures_util::",
                "<core::",
            ];

            frames.retain(|frame| {
                let Some(name) = frame.name.as_ref() else {
                    return true;
                };
                !filters.iter().any(|f| name.starts_with(f))
            });
        }))
        .install()?;

    Ok(())
}

/// Map the `-q` flag and the number of `-v` flags to a max log level. `-q`
/// turns logging off entirely; any `-v` wins over it.
pub fn level_filter(quiet: bool, verbose: u8) -> LevelFilter {
    match (quiet, verbose) {
        (true, 0) => LevelFilter::OFF,
        (false, 0) => LevelFilter::ERROR,
        (_, 1) => LevelFilter::WARN,
        (_, 2) => LevelFilter::INFO,
        (_, 3) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
