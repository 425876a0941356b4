use std::io::{self, Write};

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceReportRow {
    pub roll_no: String,
    pub full_name: String,
    pub total_days: i64,
    pub present_days: i64,
    pub percentage: f64,
}

/// Stream the attendance report: fixed header row, then one row per student
/// in the order the iterator yields them. Returns rows written.
pub fn write_attendance_csv<W, I>(out: &mut W, rows: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = AttendanceReportRow>,
{
    writeln!(
        out,
        "Roll No,Student Name,Total Days,Present Days,Attendance %"
    )?;
    let mut written = 0usize;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{:.2}%",
            csv_quote(&row.roll_no),
            csv_quote(&row.full_name),
            row.total_days,
            row.present_days,
            row.percentage
        )?;
        written += 1;
    }
    Ok(written)
}

#[derive(Debug, Clone)]
pub struct PerformanceReportRow {
    pub roll_no: String,
    pub full_name: String,
    pub average_marks: Option<f64>,
}

pub fn performance_line(row: &PerformanceReportRow) -> String {
    match row.average_marks {
        Some(avg) => format!("{} - {}: {:.2}%", row.roll_no, row.full_name, avg),
        None => format!("{} - {}: no marks recorded", row.roll_no, row.full_name),
    }
}

// A4 points. The cursor model matches the layout contract: text starts near
// the top, steps down 20 per line, and a new page begins below y=100.
const PAGE_WIDTH: f64 = 595.0;
const PAGE_HEIGHT: f64 = 842.0;
const CURSOR_TOP: f64 = 800.0;
const CURSOR_BOTTOM: f64 = 100.0;
const LINE_STEP: f64 = 20.0;
const TEXT_X: f64 = 100.0;

/// Minimal single-font PDF document: absolute-positioned Helvetica text
/// lines collected per page, serialized with a correct xref table.
pub struct PdfDoc {
    pages: Vec<Vec<(f64, f64, String)>>,
    current: Vec<(f64, f64, String)>,
}

impl PdfDoc {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn text(&mut self, x: f64, y: f64, s: &str) {
        self.current.push((x, y, s.to_string()));
    }

    pub fn end_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
    }

    fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for ch in s.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '(' => out.push_str("\\("),
                ')' => out.push_str("\\)"),
                _ => out.push(ch),
            }
        }
        out
    }

    pub fn write_to<W: Write>(mut self, out: &mut W) -> io::Result<()> {
        if !self.current.is_empty() {
            self.end_page();
        }
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }

        // Object ids: 1 catalog, 2 page tree, 3 font, then a page and a
        // content stream pair per page.
        let page_count = self.pages.len();
        let obj_count = 3 + 2 * page_count;

        let mut buf: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = vec![0; obj_count + 1];

        buf.extend_from_slice(b"%PDF-1.4\n");

        let kids = (0..page_count)
            .map(|i| format!("{} 0 R", 4 + 2 * i))
            .collect::<Vec<_>>()
            .join(" ");

        offsets[1] = buf.len();
        buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

        offsets[2] = buf.len();
        buf.extend_from_slice(
            format!(
                "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
                kids, page_count
            )
            .as_bytes(),
        );

        offsets[3] = buf.len();
        buf.extend_from_slice(
            b"3 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n",
        );

        for (i, lines) in self.pages.iter().enumerate() {
            let page_id = 4 + 2 * i;
            let content_id = page_id + 1;

            offsets[page_id] = buf.len();
            buf.extend_from_slice(
                format!(
                    "{} 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                     /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>\nendobj\n",
                    page_id, PAGE_WIDTH, PAGE_HEIGHT, content_id
                )
                .as_bytes(),
            );

            let mut stream = String::new();
            for (x, y, text) in lines {
                stream.push_str(&format!(
                    "BT /F1 12 Tf 1 0 0 1 {:.2} {:.2} Tm ({}) Tj ET\n",
                    x,
                    y,
                    Self::escape(text)
                ));
            }

            offsets[content_id] = buf.len();
            buf.extend_from_slice(
                format!(
                    "{} 0 obj\n<< /Length {} >>\nstream\n{}endstream\nendobj\n",
                    content_id,
                    stream.len(),
                    stream
                )
                .as_bytes(),
            );
        }

        let xref_offset = buf.len();
        buf.extend_from_slice(format!("xref\n0 {}\n", obj_count + 1).as_bytes());
        buf.extend_from_slice(b"0000000000 65535 f \n");
        for off in offsets.iter().skip(1) {
            buf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        buf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                obj_count + 1,
                xref_offset
            )
            .as_bytes(),
        );

        out.write_all(&buf)
    }
}

/// Render the performance report document: header block, then one line per
/// student. The caller decides which students appear and in what order; this
/// layer only owns cursor movement and pagination.
pub fn render_performance_pdf(
    department_name: &str,
    classroom_name: Option<&str>,
    generated_at: &str,
    rows: &[PerformanceReportRow],
) -> PdfDoc {
    let mut doc = PdfDoc::new();
    doc.text(
        TEXT_X,
        CURSOR_TOP,
        &format!("Performance Report - {}", department_name),
    );
    let mut y = CURSOR_TOP - LINE_STEP;
    doc.text(TEXT_X, y, &format!("Generated on: {}", generated_at));
    y -= LINE_STEP;
    if let Some(name) = classroom_name {
        doc.text(TEXT_X, y, &format!("Class: {}", name));
        y -= LINE_STEP;
    }

    for row in rows {
        doc.text(TEXT_X, y, &performance_line(row));
        y -= LINE_STEP;
        if y < CURSOR_BOTTOM {
            doc.end_page();
            y = CURSOR_TOP;
        }
    }
    doc
}
