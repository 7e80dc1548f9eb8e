use miette::{Context, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use time::{
    format_description::{self, FormatItem},
    OffsetDateTime, UtcOffset,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    FmtSubscriber,
};

/// Initialize the logging system
pub fn init_logging(level: Level) -> Result<()> {
    // Fails when other threads are already running, fall back to UTC in that case
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let time_format = format_description::parse("[hour]:[minute]:[second]")
        .into_diagnostic()
        .wrap_err("Invalid log time format")?;

    let subscriber = FmtSubscriber::builder()
        .event_format(PipelineLogger {
            offset: local_offset,
            time_format,
        })
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// Print the time, the level, and the name of the thread, which tells
/// which part of the pipeline (enumerator, resolver, worker) logged the event
struct PipelineLogger {
    offset: UtcOffset,
    time_format: Vec<FormatItem<'static>>,
}

impl<S, N> FormatEvent<S, N> for PipelineLogger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        let now = OffsetDateTime::now_utc().to_offset(self.offset).time();
        let now = now.format(&self.time_format).map_err(|_| std::fmt::Error)?;
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");

        if writer.has_ansi_escapes() {
            let level = match *metadata.level() {
                Level::ERROR => metadata.level().red().to_string(),
                Level::WARN => metadata.level().yellow().to_string(),
                Level::DEBUG | Level::TRACE => metadata.level().blue().to_string(),
                _ => metadata.level().green().to_string(),
            };

            write!(&mut writer, "{now} {level:>5} {:<10} ", thread_name.yellow())?;
        } else {
            write!(
                &mut writer,
                "{now} {:>5} {thread_name:<10} ",
                metadata.level()
            )?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
