use anstyle::{AnsiColor, Effects, Style};

use crate::config::HumanFormat;
use crate::types::OutputRecord;

pub struct LineFormatter {
    human: HumanFormat,
    container_width: usize,
}

impl LineFormatter {
    pub fn new(human: HumanFormat) -> Self {
        Self {
            human,
            container_width: 12,
        }
    }

    pub fn format_human(&self, record: &OutputRecord) -> String {
        let container = if self.human.color {
            paint(&record.container, self.style_for(&record.container))
        } else {
            record.container.clone()
        };

        if self.human.timestamps {
            let ts = record
                .ts
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "<bad-ts>".to_string());

            format!(
                "{}  {:<cw$}  {}",
                ts,
                container,
                record.message,
                cw = self.container_width
            )
        } else {
            format!(
                "{:<cw$}  {}",
                container,
                record.message,
                cw = self.container_width
            )
        }
    }

    fn style_for(&self, container: &str) -> Style {
        let color = match stable_color_index(container) {
            0 => AnsiColor::Green,
            1 => AnsiColor::Cyan,
            2 => AnsiColor::Yellow,
            3 => AnsiColor::Magenta,
            4 => AnsiColor::Blue,
            _ => AnsiColor::Red,
        };

        Style::new()
            .fg_color(Some(color.into()))
            .effects(Effects::BOLD)
    }
}

fn paint(s: &str, style: Style) -> String {
    format!("{}{}{}", style.render(), s, style.render_reset())
}

fn stable_color_index(s: &str) -> usize {
    // Small stable hash (FNV-1a style), avoids extra deps.
    let mut h: u64 = 1469598103934665603;
    for &b in s.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    (h as usize) % 6
}
