//! Minimal PDF 1.4 writer: base-14 Helvetica text, ruled tables and
//! photos, laid out top to bottom on A4 pages. JPEG files are embedded
//! as-is; PNG and WEBP are decoded and stored as compressed RGB.

use std::fmt::Write as _;
use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
const MARGIN: f32 = 42.5;
const CELL_PAD: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }
}

/// Characters of average Helvetica width that fit in `width`.
fn chars_fitting(width: f32, size: f32) -> usize {
    ((width / (size * 0.52)).floor() as usize).max(1)
}

/// Encodes `text` as a PDF literal string in WinAnsi. Characters outside
/// Latin-1 become `?`.
pub fn literal(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'(');
    for c in text.chars() {
        let c = match c {
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\t' | '\n' | '\r' => ' ',
            other => other,
        };
        let code = c as u32;
        let byte = if (0x20..0x7F).contains(&code) || (0xA0..=0xFF).contains(&code) {
            code as u8
        } else {
            b'?'
        };
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b')');
    out
}

/// Greedy word wrap at `max_chars`; words longer than a line are split.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let needed = if current.is_empty() { word.len() } else { current.chars().count() + 1 + word.len() };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// An image XObject ready to be written: pixel size, colour space, stream
/// filter and encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfImage {
    pub width: u32,
    pub height: u32,
    color_space: &'static str,
    filter: &'static str,
    data: Vec<u8>,
}

impl PdfImage {
    /// JPEG, PNG or WEBP bytes; `None` when the data cannot be embedded.
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8]) {
            Self::jpeg(data)
        } else {
            Self::raster(&data)
        }
    }

    /// Reads the frame header and keeps the file as a DCTDecode stream.
    /// Returns `None` for anything that is not a JPEG with a readable
    /// frame header.
    pub fn jpeg(data: Vec<u8>) -> Option<Self> {
        if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
            return None;
        }
        let mut i = 2;
        while i + 3 < data.len() {
            if data[i] != 0xFF {
                return None;
            }
            let marker = data[i + 1];
            if marker == 0xFF {
                i += 1;
                continue;
            }
            if marker == 0x01 || (0xD0..=0xD8).contains(&marker) {
                i += 2;
                continue;
            }
            let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
            let is_frame = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
            if is_frame {
                if i + 9 >= data.len() {
                    return None;
                }
                let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
                let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
                let color_space = match data[i + 9] {
                    1 => "/DeviceGray",
                    3 => "/DeviceRGB",
                    4 => "/DeviceCMYK",
                    _ => return None,
                };
                if width == 0 || height == 0 {
                    return None;
                }
                return Some(PdfImage {
                    width,
                    height,
                    color_space,
                    filter: "/DCTDecode",
                    data,
                });
            }
            if marker == 0xD9 || marker == 0xDA {
                return None;
            }
            i += 2 + len;
        }
        None
    }

    /// Decodes PNG or WEBP into 8-bit RGB, flattening transparency onto a
    /// white background, and deflates the samples.
    fn raster(data: &[u8]) -> Option<Self> {
        let decoded = match image::load_from_memory(data) {
            Ok(img) => img,
            Err(e) => {
                debug!("image decode failed: {e}");
                return None;
            }
        };
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for px in rgba.pixels() {
            let [r, g, b, a] = px.0;
            let alpha = u16::from(a);
            for c in [r, g, b] {
                rgb.push(((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8);
            }
        }
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(rgb.len() / 2), Compression::default());
        encoder.write_all(&rgb).ok()?;
        Some(PdfImage {
            width,
            height,
            color_space: "/DeviceRGB",
            filter: "/FlateDecode",
            data: encoder.finish().ok()?,
        })
    }
}

/// A document under construction. Content flows down from the top margin
/// and breaks onto a new page when it would cross the bottom margin.
pub struct PdfDocument {
    pages: Vec<Vec<u8>>,
    images: Vec<PdfImage>,
    y: f32,
}

impl Default for PdfDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfDocument {
    pub fn new() -> Self {
        PdfDocument {
            pages: vec![Vec::new()],
            images: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    pub fn content_width(&self) -> f32 {
        PAGE_WIDTH - 2.0 * MARGIN
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn ensure(&mut self, height: f32) {
        if self.y - height < MARGIN && self.y < PAGE_HEIGHT - MARGIN {
            self.new_page();
        }
    }

    fn ops(&mut self) -> &mut Vec<u8> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn put_text(&mut self, font: Font, size: f32, x: f32, baseline: f32, text: &str) {
        let mut op = format!("BT /{} {size:.1} Tf {x:.2} {baseline:.2} Td ", font.resource()).into_bytes();
        op.extend(literal(text));
        op.extend_from_slice(b" Tj ET\n");
        self.ops().extend(op);
    }

    fn put_rect(&mut self, x: f32, y: f32, w: f32, h: f32, fill_gray: Option<f32>) {
        let mut op = String::new();
        if let Some(g) = fill_gray {
            let _ = write!(op, "{g:.2} g {x:.2} {y:.2} {w:.2} {h:.2} re f 0 g ");
        }
        let _ = writeln!(op, "0.5 w {x:.2} {y:.2} {w:.2} {h:.2} re S");
        self.ops().extend(op.into_bytes());
    }

    /// Wrapped paragraph at the left margin.
    pub fn text(&mut self, font: Font, size: f32, text: &str) {
        let leading = size * 1.4;
        let max_chars = chars_fitting(self.content_width(), size);
        for line in wrap(text, max_chars) {
            self.ensure(leading);
            self.y -= leading;
            self.put_text(font, size, MARGIN, self.y + size * 0.3, &line);
        }
    }

    pub fn heading(&mut self, size: f32, text: &str) {
        self.text(Font::Bold, size, text);
        self.gap(size * 0.3);
    }

    pub fn gap(&mut self, height: f32) {
        self.y -= height;
        if self.y < MARGIN {
            self.new_page();
        }
    }

    /// Two-column label/value grid.
    pub fn key_values(&mut self, size: f32, pairs: &[(&str, String)]) {
        let width = self.content_width();
        let label_w = width * 0.35;
        let row_h = size + 2.0 * CELL_PAD + 2.0;
        for (label, value) in pairs {
            self.ensure(row_h);
            let bottom = self.y - row_h;
            let value = if value.trim().is_empty() { "-" } else { value.as_str() };
            self.put_rect(MARGIN, bottom, label_w, row_h, Some(0.93));
            self.put_rect(MARGIN + label_w, bottom, width - label_w, row_h, None);
            let baseline = bottom + CELL_PAD + 2.0;
            let label_fit = truncate(label, chars_fitting(label_w - 2.0 * CELL_PAD, size));
            let value_fit = truncate(value, chars_fitting(width - label_w - 2.0 * CELL_PAD, size));
            self.put_text(Font::Bold, size, MARGIN + CELL_PAD, baseline, &label_fit);
            self.put_text(Font::Regular, size, MARGIN + label_w + CELL_PAD, baseline, &value_fit);
            self.y = bottom;
        }
        self.gap(size);
    }

    /// Ruled table. `widths` are fractions of the content width; the header
    /// row is repeated after a page break.
    pub fn table(&mut self, size: f32, headers: &[&str], widths: &[f32], rows: &[Vec<String>]) {
        let total = self.content_width();
        let cols: Vec<f32> = widths.iter().map(|w| w * total).collect();
        let row_h = size + 2.0 * CELL_PAD + 2.0;

        self.ensure(row_h * 2.0);
        self.table_row(size, &cols, row_h, headers.iter().map(|h| h.to_string()), Font::Bold, Some(0.85));
        for row in rows {
            if self.y - row_h < MARGIN {
                self.new_page();
                self.table_row(size, &cols, row_h, headers.iter().map(|h| h.to_string()), Font::Bold, Some(0.85));
            }
            self.table_row(size, &cols, row_h, row.iter().cloned(), Font::Regular, None);
        }
        self.gap(size);
    }

    fn table_row<I>(&mut self, size: f32, cols: &[f32], row_h: f32, cells: I, font: Font, fill: Option<f32>)
    where
        I: Iterator<Item = String>,
    {
        let bottom = self.y - row_h;
        let mut x = MARGIN;
        for (w, cell) in cols.iter().zip(cells) {
            self.put_rect(x, bottom, *w, row_h, fill);
            let fit = truncate(&cell, chars_fitting(w - 2.0 * CELL_PAD, size));
            self.put_text(font, size, x + CELL_PAD, bottom + CELL_PAD + 2.0, &fit);
            x += w;
        }
        self.y = bottom;
    }

    /// Places the image at the left margin, scaled down to fit
    /// `max_width` and the page height.
    pub fn image(&mut self, image: PdfImage, max_width: f32) {
        let max_w = max_width.min(self.content_width());
        let max_h = PAGE_HEIGHT - 2.0 * MARGIN;
        let scale = (max_w / image.width as f32).min(max_h / image.height as f32).min(1.0);
        let (w, h) = (image.width as f32 * scale, image.height as f32 * scale);
        self.ensure(h);
        self.y -= h;
        self.images.push(image);
        let op = format!(
            "q {w:.2} 0 0 {h:.2} {MARGIN:.2} {:.2} cm /Im{} Do Q\n",
            self.y,
            self.images.len()
        );
        self.ops().extend(op.into_bytes());
    }

    /// Serialises the document.
    pub fn finish(self) -> Vec<u8> {
        let image_base = 5;
        let page_base = image_base + self.images.len();
        let object_count = page_base + 2 * self.pages.len() - 1;

        let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::with_capacity(object_count);

        let mut push_obj = |out: &mut Vec<u8>, body: &[u8]| {
            offsets.push(out.len());
            let n = offsets.len();
            out.extend(format!("{n} 0 obj\n").into_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        };

        push_obj(&mut out, b"<< /Type /Catalog /Pages 2 0 R >>");

        let kids: Vec<String> = (0..self.pages.len())
            .map(|i| format!("{} 0 R", page_base + 2 * i))
            .collect();
        let xobjects: String = (0..self.images.len())
            .map(|i| format!("/Im{} {} 0 R ", i + 1, image_base + i))
            .collect();
        let pages = format!(
            "<< /Type /Pages /Kids [{}] /Count {} /MediaBox [0 0 {PAGE_WIDTH:.2} {PAGE_HEIGHT:.2}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> /XObject << {xobjects}>> >> >>",
            kids.join(" "),
            self.pages.len()
        );
        push_obj(&mut out, pages.as_bytes());
        push_obj(
            &mut out,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
        );
        push_obj(
            &mut out,
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>",
        );

        for image in &self.images {
            let mut body = format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} \
                 /BitsPerComponent 8 /Filter {} /Length {} >>\nstream\n",
                image.width,
                image.height,
                image.color_space,
                image.filter,
                image.data.len()
            )
            .into_bytes();
            body.extend_from_slice(&image.data);
            body.extend_from_slice(b"\nendstream");
            push_obj(&mut out, &body);
        }

        for (i, content) in self.pages.iter().enumerate() {
            let page = format!(
                "<< /Type /Page /Parent 2 0 R /Contents {} 0 R >>",
                page_base + 2 * i + 1
            );
            push_obj(&mut out, page.as_bytes());
            let mut body = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
            body.extend_from_slice(content);
            body.extend_from_slice(b"\nendstream");
            push_obj(&mut out, &body);
        }

        let xref_at = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1);
        for off in &offsets {
            let _ = writeln!(xref, "{off:010} 00000 n ");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            offsets.len() + 1
        );
        out.extend(xref.into_bytes());
        out
    }
}
