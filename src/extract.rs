//! Document extraction: uploaded bytes → provenance-tagged [`TextUnit`]s.
//!
//! | Kind | Units produced |
//! |------|----------------|
//! | PDF  | one `text` unit per non-empty page (location = page) |
//! | DOCX | `text` units for runs of paragraphs, one `table` unit per table, one `image_description` per embedded picture |
//! | PPTX | per slide: `slide` text, speaker `notes`, one `image_description` per picture (location = slide) |
//! | Image | a single `image_description` |
//! | Text | a single `text` unit |
//!
//! Pictures are never embedded as-is: each one is sent to an
//! [`ImageDescriber`] with [`DESCRIBE_INSTRUCTION`] and the returned
//! description takes its place. A picture inside a document that cannot be
//! described is logged and dropped; a standalone image file that cannot be
//! described fails the file.
//!
//! Parsing is synchronous and finishes before any description request is
//! awaited. ZIP entries are read through a size cap.

use async_trait::async_trait;
use std::io::Read;
use std::path::Path;

use crate::models::{ContentKind, TextUnit};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";

/// Instruction sent with every image.
pub const DESCRIBE_INSTRUCTION: &str = "Describe this image factually. Report the visible text, \
labels, components and how they are connected, exactly as shown. Do not speculate about anything \
that is not visible.";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("image description failed: {0}")]
    Vision(String),
    #[error("cannot describe {0}: image descriptions are not enabled")]
    NoDescriber(String),
}

/// Vision-capable model used to replace pictures with text.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn describe(
        &self,
        image: &[u8],
        media_type: &str,
        instruction: &str,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "gif" => Some(ImageFormat::Gif),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Pptx,
    Image(ImageFormat),
    Text,
}

impl DocumentKind {
    /// Detect the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "pptx" => Some(DocumentKind::Pptx),
            "txt" | "md" | "text" => Some(DocumentKind::Text),
            other => ImageFormat::from_extension(other).map(DocumentKind::Image),
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => MIME_PDF,
            DocumentKind::Docx => MIME_DOCX,
            DocumentKind::Pptx => MIME_PPTX,
            DocumentKind::Image(f) => f.media_type(),
            DocumentKind::Text => MIME_TEXT,
        }
    }
}

/// A picture waiting for a description.
struct PendingImage {
    name: String,
    location: Option<u32>,
    media_type: &'static str,
    bytes: Vec<u8>,
}

/// Parsed content with pictures not yet described. `order` interleaves
/// finished units (`Ok`) with picture slots (`Err(index into images)`).
#[derive(Default)]
struct Parsed {
    order: Vec<Result<TextUnit, usize>>,
    images: Vec<PendingImage>,
}

impl Parsed {
    fn unit(&mut self, source: &str, location: Option<u32>, kind: ContentKind, text: String) {
        if !text.trim().is_empty() {
            self.order.push(Ok(TextUnit {
                source: source.to_string(),
                location,
                kind,
                text,
            }));
        }
    }

    fn image(&mut self, image: PendingImage) {
        self.order.push(Err(self.images.len()));
        self.images.push(image);
    }
}

/// A file read from disk and extracted. The raw bytes are kept for
/// callers that need a second view of the document (claims).
#[derive(Debug)]
pub struct ExtractedFile {
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    pub units: Vec<TextUnit>,
}

/// Read a file from disk and extract it. The kind is taken from the
/// file extension.
pub async fn extract_file(
    path: &Path,
    describer: Option<&dyn ImageDescriber>,
) -> Result<ExtractedFile, ExtractError> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let units = extract_units(&name, &bytes, kind, describer).await?;
    Ok(ExtractedFile {
        name,
        kind,
        bytes,
        units,
    })
}

/// Extract text units from `bytes` of the declared `kind`.
pub async fn extract_units(
    source: &str,
    bytes: &[u8],
    kind: DocumentKind,
    describer: Option<&dyn ImageDescriber>,
) -> Result<Vec<TextUnit>, ExtractError> {
    let parsed = match kind {
        DocumentKind::Pdf => parse_pdf(source, bytes)?,
        DocumentKind::Docx => parse_docx(source, bytes)?,
        DocumentKind::Pptx => parse_pptx(source, bytes)?,
        DocumentKind::Text => {
            let mut parsed = Parsed::default();
            parsed.unit(
                source,
                None,
                ContentKind::Text,
                String::from_utf8_lossy(bytes).into_owned(),
            );
            parsed
        }
        DocumentKind::Image(format) => {
            let Some(describer) = describer else {
                return Err(ExtractError::NoDescriber(source.to_string()));
            };
            let description = describer
                .describe(bytes, format.media_type(), DESCRIBE_INSTRUCTION)
                .await
                .map_err(|e| ExtractError::Vision(e.to_string()))?;
            return Ok(vec![TextUnit {
                source: source.to_string(),
                location: None,
                kind: ContentKind::ImageDescription,
                text: description.trim().to_string(),
            }]);
        }
    };

    describe_pending(source, parsed, describer).await
}

async fn describe_pending(
    source: &str,
    parsed: Parsed,
    describer: Option<&dyn ImageDescriber>,
) -> Result<Vec<TextUnit>, ExtractError> {
    let Parsed { order, images } = parsed;
    let mut units = Vec::with_capacity(order.len());

    if describer.is_none() && !images.is_empty() {
        tracing::warn!(
            source,
            images = images.len(),
            "image descriptions not enabled; embedded pictures skipped"
        );
    }

    for entry in order {
        match entry {
            Ok(unit) => units.push(unit),
            Err(idx) => {
                let Some(describer) = describer else { continue };
                let image = &images[idx];
                match describer
                    .describe(&image.bytes, image.media_type, DESCRIBE_INSTRUCTION)
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => units.push(TextUnit {
                        source: source.to_string(),
                        location: image.location,
                        kind: ContentKind::ImageDescription,
                        text: text.trim().to_string(),
                    }),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(source, image = %image.name, "image description failed: {}", e)
                    }
                }
            }
        }
    }

    Ok(units)
}

// ============ PDF ============

/// Page texts of a PDF. The parser panics on some malformed files; that
/// is reported as an extraction error for this file only.
fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(pages) => pages.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "parser panicked".to_string());
            Err(ExtractError::Pdf(format!("malformed document: {}", reason)))
        }
    }
}

fn parse_pdf(source: &str, bytes: &[u8]) -> Result<Parsed, ExtractError> {
    let pages = pdf_pages(bytes)?;
    let mut parsed = Parsed::default();
    for (i, page) in pages.into_iter().enumerate() {
        parsed.unit(source, Some(i as u32 + 1), ContentKind::Text, page.trim().to_string());
    }
    Ok(parsed)
}

// ============ XML walking ============

enum Node {
    Open {
        name: Vec<u8>,
        attrs: Vec<(String, String)>,
    },
    Close(Vec<u8>),
    Leaf {
        name: Vec<u8>,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

fn attributes(e: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            (key, value)
        })
        .collect()
}

/// Stream `xml` through `visit` with namespace prefixes stripped and text
/// unescaped but not trimmed.
fn walk_xml(xml: &[u8], mut visit: impl FnMut(Node)) -> Result<(), ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        let node = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => Some(Node::Open {
                name: e.local_name().as_ref().to_vec(),
                attrs: attributes(&e),
            }),
            Ok(Event::End(e)) => Some(Node::Close(e.local_name().as_ref().to_vec())),
            Ok(Event::Empty(e)) => Some(Node::Leaf {
                name: e.local_name().as_ref().to_vec(),
                attrs: attributes(&e),
            }),
            Ok(Event::Text(t)) => Some(Node::Text(
                t.unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?
                    .into_owned(),
            )),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => None,
        };
        buf.clear();
        if let Some(node) = node {
            visit(node);
        }
    }
    Ok(())
}

// ============ ZIP ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Resolve a relationship target against the directory of the part that
/// references it (`ppt/slides` + `../media/a.png` → `ppt/media/a.png`).
fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn image_media_type(part: &str) -> Option<&'static str> {
    let ext = part.rsplit('.').next()?;
    ImageFormat::from_extension(ext).map(|f| f.media_type())
}

fn file_name(part: &str) -> String {
    part.rsplit('/').next().unwrap_or(part).to_string()
}

// ============ DOCX ============

/// A top-level block of a Word document body.
#[derive(Debug, Clone, PartialEq)]
pub enum DocxBlock {
    Paragraph(String),
    Table(Vec<Vec<String>>),
}

#[derive(Default)]
struct DocxWalker {
    blocks: Vec<DocxBlock>,
    para: String,
    in_text: bool,
    in_run: bool,
    table_depth: usize,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

impl DocxWalker {
    fn end_paragraph(&mut self) {
        let para = std::mem::take(&mut self.para);
        if self.table_depth == 0 {
            self.blocks.push(DocxBlock::Paragraph(para));
        } else if !para.is_empty() {
            if !self.cell.is_empty() {
                self.cell.push('\n');
            }
            self.cell.push_str(&para);
        }
    }

    fn visit(&mut self, node: Node) {
        match node {
            Node::Open { name, .. } => match name.as_slice() {
                b"p" => self.para.clear(),
                b"r" => self.in_run = true,
                b"t" => self.in_text = true,
                b"tbl" => {
                    self.table_depth += 1;
                    if self.table_depth == 1 {
                        self.rows.clear();
                    }
                }
                b"tr" if self.table_depth == 1 => self.row.clear(),
                b"tc" if self.table_depth == 1 => self.cell.clear(),
                _ => {}
            },
            Node::Close(name) => match name.as_slice() {
                b"p" => self.end_paragraph(),
                b"r" => self.in_run = false,
                b"t" => self.in_text = false,
                b"tbl" => {
                    self.table_depth = self.table_depth.saturating_sub(1);
                    if self.table_depth == 0 {
                        let rows = std::mem::take(&mut self.rows);
                        self.blocks.push(DocxBlock::Table(rows));
                    }
                }
                b"tr" if self.table_depth == 1 => {
                    let row = std::mem::take(&mut self.row);
                    self.rows.push(row);
                }
                b"tc" if self.table_depth == 1 => {
                    let cell = std::mem::take(&mut self.cell);
                    self.row.push(cell);
                }
                _ => {}
            },
            Node::Leaf { name, .. } => match name.as_slice() {
                b"p" => {
                    self.para.clear();
                    self.end_paragraph();
                }
                b"tab" if self.in_run => self.para.push('\t'),
                b"br" | b"cr" if self.in_run => self.para.push('\n'),
                _ => {}
            },
            Node::Text(text) => {
                if self.in_text {
                    self.para.push_str(&text);
                }
            }
        }
    }
}

/// Parse `word/document.xml` into paragraphs and tables, keeping paragraph
/// text exactly as authored (tabs and line breaks included).
pub fn docx_blocks(bytes: &[u8]) -> Result<Vec<DocxBlock>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_ZIP_ENTRY_BYTES)?;
    let mut walker = DocxWalker::default();
    walk_xml(&xml, |node| walker.visit(node))?;
    Ok(walker.blocks)
}

fn render_table(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_docx(source: &str, bytes: &[u8]) -> Result<Parsed, ExtractError> {
    let blocks = docx_blocks(bytes)?;
    let mut parsed = Parsed::default();

    // Consecutive paragraphs form one text unit; tables break the run.
    let mut run: Vec<String> = Vec::new();
    for block in blocks {
        match block {
            DocxBlock::Paragraph(p) => {
                if !p.trim().is_empty() {
                    run.push(p);
                }
            }
            DocxBlock::Table(rows) => {
                parsed.unit(source, None, ContentKind::Text, run.join("\n\n"));
                run.clear();
                parsed.unit(source, None, ContentKind::Table, render_table(&rows));
            }
        }
    }
    parsed.unit(source, None, ContentKind::Text, run.join("\n\n"));

    let mut archive = open_archive(bytes)?;
    let mut media: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("word/media/") && image_media_type(n).is_some())
        .map(|s| s.to_string())
        .collect();
    media.sort();
    for part in media {
        let Some(media_type) = image_media_type(&part) else { continue };
        let bytes = read_zip_entry_bounded(&mut archive, &part, MAX_ZIP_ENTRY_BYTES)?;
        parsed.image(PendingImage {
            name: file_name(&part),
            location: None,
            media_type,
            bytes,
        });
    }

    Ok(parsed)
}

// ============ PPTX ============

/// Collects `a:p` paragraphs, skipping field values such as slide numbers.
#[derive(Default)]
struct DrawingTextWalker {
    paragraphs: Vec<String>,
    para: String,
    in_text: bool,
    in_field: bool,
}

impl DrawingTextWalker {
    fn visit(&mut self, node: Node) {
        match node {
            Node::Open { name, .. } => match name.as_slice() {
                b"p" => self.para.clear(),
                b"t" => self.in_text = true,
                b"fld" => self.in_field = true,
                _ => {}
            },
            Node::Close(name) => match name.as_slice() {
                b"p" => {
                    let para = std::mem::take(&mut self.para);
                    if !para.trim().is_empty() {
                        self.paragraphs.push(para);
                    }
                }
                b"t" => self.in_text = false,
                b"fld" => self.in_field = false,
                _ => {}
            },
            Node::Leaf { name, .. } => {
                if name.as_slice() == b"br" {
                    self.para.push('\n');
                }
            }
            Node::Text(text) => {
                if self.in_text && !self.in_field {
                    self.para.push_str(&text);
                }
            }
        }
    }
}

fn drawing_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut walker = DrawingTextWalker::default();
    walk_xml(xml, |node| walker.visit(node))?;
    Ok(walker.paragraphs.join("\n"))
}

/// `(type suffix, resolved target)` pairs from a `.rels` part.
fn relationships(xml: &[u8], base_dir: &str) -> Result<Vec<(String, String)>, ExtractError> {
    let mut rels = Vec::new();
    walk_xml(xml, |node| {
        let attrs = match node {
            Node::Open { name, attrs } | Node::Leaf { name, attrs } if name == b"Relationship" => {
                attrs
            }
            _ => return,
        };
        let get = |k: &str| attrs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        if get("TargetMode") == Some("External") {
            return;
        }
        if let (Some(kind), Some(target)) = (get("Type"), get("Target")) {
            let kind = kind.rsplit('/').next().unwrap_or(kind).to_string();
            rels.push((kind, resolve_part(base_dir, target)));
        }
    })?;
    Ok(rels)
}

fn slide_parts(archive: &Archive<'_>) -> Vec<(u32, String)> {
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|num| (num, n.to_string()))
        })
        .collect();
    slides.sort_by_key(|(num, _)| *num);
    slides
}

fn parse_pptx(source: &str, bytes: &[u8]) -> Result<Parsed, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut parsed = Parsed::default();

    for (num, part) in slide_parts(&archive) {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_ZIP_ENTRY_BYTES)?;
        parsed.unit(source, Some(num), ContentKind::Slide, drawing_text(&xml)?);

        let rels_part = format!("ppt/slides/_rels/slide{}.xml.rels", num);
        if archive.index_for_name(&rels_part).is_none() {
            continue;
        }
        let rels_xml = read_zip_entry_bounded(&mut archive, &rels_part, MAX_ZIP_ENTRY_BYTES)?;
        let mut seen_media = Vec::new();
        for (kind, target) in relationships(&rels_xml, "ppt/slides")? {
            if archive.index_for_name(&target).is_none() {
                continue;
            }
            match kind.as_str() {
                "notesSlide" => {
                    let notes = read_zip_entry_bounded(&mut archive, &target, MAX_ZIP_ENTRY_BYTES)?;
                    parsed.unit(source, Some(num), ContentKind::Notes, drawing_text(&notes)?);
                }
                "image" => {
                    let Some(media_type) = image_media_type(&target) else {
                        tracing::debug!(source, part = %target, "skipping unsupported picture format");
                        continue;
                    };
                    if seen_media.contains(&target) {
                        continue;
                    }
                    let bytes = read_zip_entry_bounded(&mut archive, &target, MAX_ZIP_ENTRY_BYTES)?;
                    parsed.image(PendingImage {
                        name: file_name(&target),
                        location: Some(num),
                        media_type,
                        bytes,
                    });
                    seen_media.push(target);
                }
                _ => {}
            }
        }
    }

    Ok(parsed)
}

// ============ Paragraph view ============

/// The document as a flat list of paragraphs, text untouched. Used by the
/// claims extractor, which needs exact paragraph boundaries.
pub fn extract_paragraphs(bytes: &[u8], kind: DocumentKind) -> Result<Vec<String>, ExtractError> {
    match kind {
        DocumentKind::Docx => Ok(docx_blocks(bytes)?
            .into_iter()
            .filter_map(|b| match b {
                DocxBlock::Paragraph(p) => Some(p),
                DocxBlock::Table(_) => None,
            })
            .collect()),
        DocumentKind::Text => Ok(split_lines(&String::from_utf8_lossy(bytes))),
        DocumentKind::Pdf => Ok(pdf_pages(bytes)?
            .iter()
            .flat_map(|p| split_lines(p))
            .collect()),
        other => Err(ExtractError::Unsupported(format!(
            "paragraph extraction from {}",
            other.mime()
        ))),
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(DocumentKind::from_path(Path::new("a/deck.PPTX")), Some(DocumentKind::Pptx));
        assert_eq!(
            DocumentKind::from_path(Path::new("fig.jpg")),
            Some(DocumentKind::Image(ImageFormat::Jpeg))
        );
        assert_eq!(DocumentKind::from_path(Path::new("notes.md")), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_path(Path::new("archive.tar")), None);
    }

    #[test]
    fn test_truncated_pdf_is_an_error() {
        let bytes = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\ntrailer\n<< /Root 1 0 R";
        assert!(matches!(pdf_pages(bytes), Err(ExtractError::Pdf(_))));
        assert!(matches!(
            extract_paragraphs(b"not a pdf at all", DocumentKind::Pdf),
            Err(ExtractError::Pdf(_))
        ));
    }

    #[test]
    fn test_resolve_part() {
        assert_eq!(resolve_part("ppt/slides", "../media/image1.png"), "ppt/media/image1.png");
        assert_eq!(
            resolve_part("ppt/slides", "../notesSlides/notesSlide2.xml"),
            "ppt/notesSlides/notesSlide2.xml"
        );
        assert_eq!(resolve_part("ppt/slides", "/ppt/media/x.gif"), "ppt/media/x.gif");
    }

    #[test]
    fn test_relationships_skip_external_targets() {
        let xml = br#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>
</Relationships>"#;
        let rels = relationships(xml, "ppt/slides").unwrap();
        assert_eq!(rels, vec![("image".to_string(), "ppt/media/image1.png".to_string())]);
    }

    #[test]
    fn test_drawing_text_skips_slide_number_fields() {
        let xml = br#"<p:notes xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>Speak to the cooling loop.</a:t></a:r></a:p><a:p><a:fld type="slidenum"><a:t>2</a:t></a:fld></a:p></p:notes>"#;
        assert_eq!(drawing_text(xml).unwrap(), "Speak to the cooling loop.");
    }

    #[test]
    fn test_docx_walker_preserves_spacing_and_tables() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:t xml:space="preserve">1.  A device,</w:t></w:r><w:r><w:tab/><w:t>comprising:</w:t></w:r></w:p>
<w:p/>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Part</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Ref</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
</w:body></w:document>"#;
        let mut walker = DocxWalker::default();
        walk_xml(xml, |n| walker.visit(n)).unwrap();
        assert_eq!(
            walker.blocks,
            vec![
                DocxBlock::Paragraph("1.  A device,\tcomprising:".into()),
                DocxBlock::Paragraph(String::new()),
                DocxBlock::Table(vec![vec!["Part".into(), "Ref".into()]]),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_and_invalid_inputs() {
        let err = extract_units("x.pdf", b"not a pdf", DocumentKind::Pdf, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));

        let err = extract_units("x.docx", b"not a zip", DocumentKind::Docx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));

        let err = extract_units("x.png", b"\x89PNG", DocumentKind::Image(ImageFormat::Png), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoDescriber(_)));
    }

    #[tokio::test]
    async fn test_plain_text_is_one_unit() {
        let units = extract_units("n.txt", b"line one\nline two", DocumentKind::Text, None)
            .await
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, ContentKind::Text);
        assert_eq!(units[0].text, "line one\nline two");
        assert!(extract_units("e.txt", b"  \n", DocumentKind::Text, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_text_paragraphs_keep_exact_lines() {
        let paras = extract_paragraphs(b"TITLE\r\n\r\n1. A thing.  ", DocumentKind::Text).unwrap();
        assert_eq!(paras, vec!["TITLE", "", "1. A thing.  "]);
    }
}
