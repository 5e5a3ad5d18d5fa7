//! Plain text report.
//!
//! ```text
//! --- Files with same binary content (1) ---
//! /photos/a.png
//! /backup/a.png
//! --- Perceptually similar images (1) ---
//! /photos/a.png
//! /photos/a-small.png (97%)
//! ```

use std::io::Write;

use yansi::{Paint, Style};

use super::{similarity, OutputError, SearchReport};

const HEADER: Style = Style::new().bold().cyan();
const PERCENT: Style = Style::new().green();

/// Text renderer for a [`SearchReport`].
#[derive(Debug)]
pub struct TextOutput<'a> {
    report: &'a SearchReport,
    color: bool,
}

impl<'a> TextOutput<'a> {
    /// Render `report`, colored when `color` is set.
    #[must_use]
    pub fn new(report: &'a SearchReport, color: bool) -> Self {
        Self { report, color }
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.paint(style).to_string()
        } else {
            text.to_string()
        }
    }

    fn write_match<W: Write>(
        &self,
        writer: &mut W,
        path: &std::path::Path,
        distance: f64,
    ) -> Result<(), OutputError> {
        let percent = format!("({:.0}%)", similarity(distance));
        writeln!(writer, "{} {}", path.display(), self.paint(&percent, PERCENT))?;
        Ok(())
    }

    /// Write the report.
    ///
    /// # Errors
    ///
    /// [`OutputError::Io`] if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), OutputError> {
        match self.report {
            SearchReport::Database { binary, similar } => {
                for (i, paths) in binary.iter().enumerate() {
                    let header = format!("--- Files with same binary content ({}) ---", i + 1);
                    writeln!(writer, "{}", self.paint(&header, HEADER))?;
                    for path in paths {
                        writeln!(writer, "{}", path.display())?;
                    }
                }
                for (i, group) in similar.iter().enumerate() {
                    let header = format!("--- Perceptually similar images ({}) ---", i + 1);
                    writeln!(writer, "{}", self.paint(&header, HEADER))?;
                    writeln!(writer, "{}", group.representative.display())?;
                    for (path, distance) in &group.members {
                        self.write_match(writer, path, *distance)?;
                    }
                }
                if self.report.is_empty() {
                    writeln!(writer, "No duplicate images found.")?;
                }
            }
            SearchReport::Sample { sample, matches } => {
                writeln!(writer, "{}", sample.display())?;
                for (path, distance) in matches {
                    self.write_match(writer, path, *distance)?;
                }
            }
        }
        Ok(())
    }

    /// Render to a string.
    ///
    /// # Errors
    ///
    /// See [`write_to`](Self::write_to).
    pub fn render(&self) -> Result<String, OutputError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
