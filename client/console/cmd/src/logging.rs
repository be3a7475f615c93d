use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for alignment
const SOURCE_NAME_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 7; // +2 for icons

/// Custom formatter producing one aligned line per event, with the endpoint
/// the event belongs to shown as the source column.
pub struct UplinkLogFormatter {
    client_name: String,
    color_enabled: bool,
}

impl UplinkLogFormatter {
    pub fn new(client_name: String) -> Self {
        let color_enabled = is_terminal();
        Self {
            client_name,
            color_enabled,
        }
    }

    /// Format the source column with fixed width. Events carrying an
    /// `endpoint` field show that endpoint, everything else shows the client
    /// name.
    fn format_source_name(&self, endpoint: Option<&str>) -> String {
        let name = endpoint.unwrap_or(&self.client_name);

        if name.len() > SOURCE_NAME_WIDTH {
            // Back off to a char boundary so multi-byte names cannot panic
            let mut cut = SOURCE_NAME_WIDTH - 1;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}…", &name[..cut])
        } else {
            format!("{:<width$}", name, width = SOURCE_NAME_WIDTH)
        }
    }

    /// Format log level with visual indicators
    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };

        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2) // +2 for icon
    }

    fn get_color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG => COLOR_BRIGHT_GRAY,
            tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }
}

impl<S, N> FormatEvent<S, N> for UplinkLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let level = event.metadata().level();

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let formatted_source = self.format_source_name(visitor.endpoint.as_deref());
        let formatted_level = self.format_log_level(level);

        let color = self.get_color_for_level(level);
        let reset_color = if self.color_enabled { COLOR_RESET } else { "" };
        let cyan_color = if self.color_enabled { COLOR_CYAN } else { "" };

        // [timestamp] [source] [level] message
        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan_color, timestamp, formatted_source, color, formatted_level, reset_color
        )?;

        writeln!(writer, "{}{}", visitor.message, reset_color)?;

        Ok(())
    }
}

/// Visitor to extract fields from the event
struct FieldVisitor {
    message: String,
    endpoint: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: String::new(),
            endpoint: None,
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => {
                self.message = format!("{:?}", value);
                // Remove quotes from debug formatting
                if self.message.starts_with('"') && self.message.ends_with('"') {
                    self.message = self.message[1..self.message.len() - 1].to_string();
                }
            }
            "endpoint" => {
                let raw = format!("{:?}", value);
                if raw.starts_with('"') && raw.ends_with('"') {
                    self.endpoint = Some(raw[1..raw.len() - 1].to_string());
                } else {
                    self.endpoint = Some(raw);
                }
            }
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => {
                self.message = value.to_string();
            }
            "endpoint" => {
                self.endpoint = Some(value.to_string());
            }
            _ => {}
        }
    }
}

/// Check if we're outputting to a terminal (for color support)
fn is_terminal() -> bool {
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return false;
    }

    std::env::var("TERM").is_ok()
}
