use std::io::{self, IsTerminal, Write};

use roster_shared::Row;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::notify::NoticeKind;
use crate::page::PageInfo;
use crate::resource::ResourceSpec;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, resource, rows, page))]
    pub fn print_rows(
        &self,
        resource: &ResourceSpec,
        rows: &[Row],
        page: &PageInfo,
    ) -> anyhow::Result<()> {
        let color = self.color && io::stdout().is_terminal();
        let out = io::stdout().lock();
        self.write_rows(out, resource, rows, page, color)
    }

    /// Table of `rows` followed by a `page X/Y (N items)` footer.
    pub fn write_rows<W: Write>(
        &self,
        mut out: W,
        resource: &ResourceSpec,
        rows: &[Row],
        page: &PageInfo,
        color: bool,
    ) -> anyhow::Result<()> {
        let mut headers = vec![resource.id_field.clone(), "status".to_string()];
        headers.extend(resource.columns.iter().cloned());

        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id(&resource.id_field).unwrap_or_else(|| "-".to_string());
            let status = row.status().unwrap_or_default();
            let status_code = if status == resource.toggle.on() {
                "32"
            } else if status == resource.toggle.off() {
                "31"
            } else {
                "0"
            };

            let mut line = vec![paint(&id, "33", color), paint(status, status_code, color)];
            line.extend(resource.columns.iter().map(|col| row.display_field(col)));
            cells.push(line);
        }

        if cells.is_empty() {
            writeln!(out, "no {} found", resource.name)?;
        } else {
            write_table(&mut out, headers, cells)?;
        }

        writeln!(
            out,
            "page {}/{} ({} items)",
            page.page_number,
            page.total_pages().max(1),
            page.total_items
        )?;
        Ok(())
    }

    pub fn print_resources(&self, resources: &[ResourceSpec]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if resources.is_empty() {
            writeln!(out, "no resources configured")?;
            return Ok(());
        }

        let headers = vec![
            "Resource".to_string(),
            "Path".to_string(),
            "Page size".to_string(),
            "Filters".to_string(),
        ];
        let rows = resources
            .iter()
            .map(|spec| {
                vec![
                    spec.name.clone(),
                    spec.path.clone(),
                    spec.page_size.to_string(),
                    spec.fields
                        .iter()
                        .map(|field| field.name.clone())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    pub fn print_notice(&self, kind: NoticeKind, message: &str) {
        let color = self.color && io::stderr().is_terminal();
        let code = match kind {
            NoticeKind::Success => "32",
            NoticeKind::Info => "36",
            NoticeKind::Error => "31",
        };
        eprintln!("{} {message}", paint(&format!("[{kind}]"), code, color));
    }
}

fn paint(text: &str, code: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        let padding = width.saturating_sub(UnicodeWidthStr::width(header.as_str()));
        write!(writer, "{header}{} ", " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{cell}{} ", " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use roster_shared::Row;
    use serde_json::json;

    use super::{Renderer, paint, strip_ansi};
    use crate::config::Config;
    use crate::page::PageInfo;
    use crate::resource::ResourceSpec;

    #[test]
    fn rows_render_as_aligned_table_with_footer() {
        let mut resource = ResourceSpec::new("blog").with_id_field("_id");
        resource.columns = vec!["title".to_string()];
        let rows = vec![
            Row::from_value(json!({"_id": "a1", "status": "active", "title": "日本"}))
                .expect("row"),
            Row::from_value(json!({"_id": "b22", "status": "deactive"})).expect("row"),
        ];

        let mut out = Vec::new();
        Renderer::plain()
            .write_rows(&mut out, &resource, &rows, &PageInfo::new(2, 10, 12), false)
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "_id status   title ");
        assert_eq!(lines[2], "a1  active   日本  ");
        assert_eq!(lines[3], "b22 deactive       ");
        assert_eq!(lines[4], "page 2/2 (12 items)");
    }

    #[test]
    fn empty_pages_still_report_position() {
        let resource = ResourceSpec::new("ticket");
        let mut out = Vec::new();
        Renderer::plain()
            .write_rows(&mut out, &resource, &[], &PageInfo::new(1, 10, 0), false)
            .expect("render");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "no ticket found\npage 1/1 (0 items)\n"
        );
    }

    #[test]
    fn color_setting_must_be_an_on_off_value() {
        let cfg = Config::from_str_lines("color = off").expect("config");
        assert!(!Renderer::new(&cfg).expect("renderer").color);

        let cfg = Config::from_str_lines("color = loud").expect("config");
        assert!(Renderer::new(&cfg).is_err());
    }

    #[test]
    fn ansi_codes_do_not_count_towards_width() {
        let painted = paint("active", "32", true);
        assert_ne!(painted, "active");
        assert_eq!(strip_ansi(&painted), "active");
    }
}
