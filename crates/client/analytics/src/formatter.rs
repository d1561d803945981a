use console::{Style, StyledObject};
use std::{
    fmt,
    time::{Duration, SystemTime},
};
use time::{format_description, OffsetDateTime, UtcOffset};
use tracing::{field::Visit, Level, Subscriber};
use tracing_core::Field;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

/// Target of the events the scheduler emits every time a stage moves forward.
pub const STAGE_RUNS_TARGET: &str = "stage_runs";

pub fn display_fn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(f: F) -> impl fmt::Display {
    DisplayFromFn(f)
}
struct DisplayFromFn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(F);
impl<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result> fmt::Display for DisplayFromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.0)(f)
    }
}

struct StageRunEvent<'a> {
    stage: &'a str,
    from: u64,
    to: u64,
    /// Micros.
    elapsed: u128,
}

#[derive(Default)]
struct StageRunEventVisitor {
    stage: String,
    from: Option<u64>,
    to: Option<u64>,
    elapsed: Option<u128>,
}

impl Visit for StageRunEventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "stage" {
            self.stage.clear();
            self.stage.push_str(value);
        }
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "from" => self.from = Some(value),
            "to" => self.to = Some(value),
            "elapsed" => self.elapsed = Some(value.into()),
            _ => {}
        }
    }
    fn record_u128(&mut self, field: &Field, value: u128) {
        if field.name() == "elapsed" {
            self.elapsed = Some(value)
        }
    }
    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {
        // ignored
    }
}

impl StageRunEventVisitor {
    fn get(&self) -> Option<StageRunEvent<'_>> {
        if self.stage.is_empty() {
            return None;
        }
        Some(StageRunEvent { stage: &self.stage, from: self.from?, to: self.to?, elapsed: self.elapsed? })
    }
}

pub fn visit_message(event: &tracing::Event<'_>, f: impl FnOnce(&dyn fmt::Debug) -> fmt::Result) -> fmt::Result {
    struct Visitor<F>(Option<F>, fmt::Result);
    impl<F: FnOnce(&dyn fmt::Debug) -> fmt::Result> Visit for Visitor<F> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                if let Some(f) = self.0.take() {
                    self.1 = (f)(value);
                }
            }
        }
    }
    let mut visitor = Visitor(Some(f), Ok(()));
    event.record(&mut visitor);
    visitor.1
}

/// Yellow past one second, red past ten.
fn elapsed_style(elapsed: Duration) -> Style {
    if elapsed > Duration::from_secs(10) {
        Style::new().red()
    } else if elapsed > Duration::from_secs(1) {
        Style::new().yellow()
    } else {
        Style::new().dim()
    }
}

pub struct CustomFormatter {
    local_offset: UtcOffset,
    dim_style: Style,
    open_bracket_dim: StyledObject<&'static str>,
    closed_bracket_dim: StyledObject<&'static str>,
    ts_format: Vec<format_description::BorrowedFormatItem<'static>>,
}

impl CustomFormatter {
    pub fn new() -> Self {
        let dim_style = Style::new().dim();
        Self {
            open_bracket_dim: dim_style.apply_to("["),
            closed_bracket_dim: dim_style.apply_to("]"),
            local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            dim_style,
            ts_format: format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:3]")
                .expect("Invalid date format constant"),
        }
    }

    fn timestamp_fmt<'a>(&'a self, ts: &'a SystemTime) -> impl fmt::Display + 'a {
        display_fn(|f| {
            let datetime: OffsetDateTime = (*ts).into();
            match datetime.to_offset(self.local_offset).format(&self.ts_format) {
                Ok(ts) => {
                    write!(f, "{}{}{}", self.open_bracket_dim, self.dim_style.apply_to(ts), self.closed_bracket_dim)
                }
                Err(_) => write!(f, "<error>"),
            }
        })
    }

    fn format_without_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        visit_message(event, |message| {
            writeln!(writer, "{} {} {:?}", self.timestamp_fmt(ts), level_style.apply_to(level), message)
        })
    }

    fn format_with_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        target: &str,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        visit_message(event, |message| {
            writeln!(
                writer,
                "{} {} {} {:?}",
                self.timestamp_fmt(ts),
                level_style.apply_to(level),
                self.dim_style.apply_to(target),
                message,
            )
        })
    }

    fn format_stage_run(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        ts: &SystemTime,
        level: &Level,
    ) -> fmt::Result {
        let mut visitor = StageRunEventVisitor::default();
        event.record(&mut visitor);
        let Some(run) = visitor.get() else {
            return self.format_without_target(writer, event, ts, level, &Style::new().green());
        };

        // u128 micros do not fit a Duration constructor, saturate instead.
        let elapsed = Duration::from_micros(u64::try_from(run.elapsed).unwrap_or(u64::MAX));
        writeln!(
            writer,
            "{} {} {} {} -> {} - {}",
            self.timestamp_fmt(ts),
            Style::new().magenta().apply_to("STAGE"),
            run.stage,
            run.from,
            run.to,
            elapsed_style(elapsed).apply_to(format!("{elapsed:.3?}")),
        )
    }
}

impl Default for CustomFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let ts = SystemTime::now();

        let metadata = event.metadata();
        let level = metadata.level();
        let target = metadata.target();

        match (level, target) {
            (&Level::INFO, STAGE_RUNS_TARGET) => self.format_stage_run(&mut writer, event, &ts, level),
            (&Level::INFO, _) => self.format_without_target(&mut writer, event, &ts, level, &Style::new().green()),
            (&Level::WARN, _) => {
                self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().yellow())
            }
            (&Level::ERROR, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().red()),
            (&Level::DEBUG, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().blue()),
            (&Level::TRACE, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().cyan()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        console::set_colors_enabled(false);
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .event_format(CustomFormatter::new())
            .with_max_level(Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn stage_runs_get_their_own_line() {
        let out = capture(|| {
            tracing::info!(target: "stage_runs", stage = "Execution", from = 100u64, to = 107u64, elapsed = 1500u128, "ignored")
        });
        assert!(out.ends_with("STAGE Execution 100 -> 107 - 1.500ms\n"), "{out}");
        assert!(!out.contains("ignored"));
    }

    #[test]
    fn incomplete_stage_run_falls_back_to_the_message() {
        let out = capture(|| tracing::info!(target: "stage_runs", stage = "Execution", "Stage moved"));
        assert!(out.ends_with("INFO Stage moved\n"), "{out}");
    }

    #[test]
    fn info_hides_the_target_and_warn_shows_it() {
        let out = capture(|| {
            tracing::info!(target: "kc_stages::stepper", "Stepped");
            tracing::warn!(target: "kc_stages::mining", "Dropping mined block");
        });
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].ends_with("] INFO Stepped"), "{out}");
        assert!(lines[1].ends_with("] WARN kc_stages::mining Dropping mined block"), "{out}");
    }

    #[rstest]
    #[case::fast(Duration::from_millis(20), Style::new().dim())]
    #[case::slow(Duration::from_secs(2), Style::new().yellow())]
    #[case::very_slow(Duration::from_secs(30), Style::new().red())]
    fn elapsed_styles(#[case] elapsed: Duration, #[case] style: Style) {
        assert_eq!(elapsed_style(elapsed), style);
    }
}
