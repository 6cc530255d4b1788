use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::ocr::Recognition;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";
const PREVIEW_NAME_LIMIT: usize = 20;
/// Extracted text must be longer than this (after trimming) to be sent on
/// for analysis.
pub const MIN_ANALYSIS_CHARS: usize = 10;

pub const PDF_PLACEHOLDER: &str =
    "PDF processing is coming soon! For now, please convert your PDF to images or use image files.";
pub const NO_TEXT_DETECTED: &str = "No text detected in the image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
}

impl AttachmentKind {
    pub fn icon(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "🖼️",
            AttachmentKind::Pdf => "📄",
        }
    }
}

/// Accepted types: any `image/*`, and PDF.
pub fn classify(media_type: &str) -> Option<AttachmentKind> {
    if media_type.starts_with("image/") {
        Some(AttachmentKind::Image)
    } else if media_type == PDF_MEDIA_TYPE {
        Some(AttachmentKind::Pdf)
    } else {
        None
    }
}

pub fn rejection_message(media_type: &str) -> String {
    format!(
        "Unsupported file type: {}. Please upload images (JPG, PNG, etc.) or PDFs.",
        media_type
    )
}

/// Declared media type of a file picked from disk, judged by its extension.
pub fn media_type_for_path(path: &Path) -> String {
    if let Ok(format) = image::ImageFormat::from_path(path) {
        return format.to_mime_type().to_string();
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => PDF_MEDIA_TYPE,
        "txt" | "md" | "log" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    pub name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl AttachedFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        AttachedFile {
            name: name.into(),
            media_type: media_type.into(),
            data: Bytes::from(data),
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, media_type_for_path(path), data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn kind(&self) -> Option<AttachmentKind> {
        classify(&self.media_type)
    }
}

/// One chip in the pending-attachments strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPreview {
    pub index: usize,
    pub icon: &'static str,
    pub label: String,
}

pub fn truncate_name(name: &str) -> String {
    if name.chars().count() > PREVIEW_NAME_LIMIT {
        let head: String = name.chars().take(PREVIEW_NAME_LIMIT).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

/// Files waiting for the next send. Only accepted files ever get in.
#[derive(Debug, Default)]
pub struct AttachmentQueue {
    files: Vec<AttachedFile>,
}

impl AttachmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the file if its type is accepted; otherwise hands it back.
    pub fn push(&mut self, file: AttachedFile) -> Result<AttachmentKind, AttachedFile> {
        match file.kind() {
            Some(kind) => {
                self.files.push(file);
                Ok(kind)
            }
            None => Err(file),
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<AttachedFile> {
        if index < self.files.len() {
            Some(self.files.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> &[AttachedFile] {
        &self.files
    }

    pub fn previews(&self) -> Vec<AttachmentPreview> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, file)| AttachmentPreview {
                index,
                icon: file.kind().map(|k| k.icon()).unwrap_or("📄"),
                label: truncate_name(&file.name),
            })
            .collect()
    }
}

/// Binary-scaled size with at most two decimals: `1536` → `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    while unit < UNITS.len() - 1 && bytes >= 1024u64.pow(unit as u32 + 1) {
        unit += 1;
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let mut number = format!("{:.2}", value);
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{} {}", number, UNITS[unit])
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn should_analyze(text: &str) -> bool {
    text.trim().chars().count() > MIN_ANALYSIS_CHARS
}

pub fn analysis_prompt(text: &str, file_name: &str) -> String {
    format!(
        "I've extracted the following text from a document called \"{}\". Please analyze it and provide insights:

{}

Please provide:
1. Document type identification (receipt, invoice, form, etc.)
2. Key information extracted (dates, amounts, names, etc.)
3. Summary of the content
4. Any notable patterns or insights",
        file_name, text
    )
}

/// Everything the analysis block shows for one recognised image.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAnalysis {
    pub file_name: String,
    /// The image as attached. Shares the file's buffer.
    pub preview: Bytes,
    pub word_count: usize,
    pub char_count: usize,
    pub confidence: i64,
    pub size: String,
    pub text: String,
}

impl DocumentAnalysis {
    pub fn new(file: &AttachedFile, recognition: &Recognition) -> Self {
        DocumentAnalysis {
            file_name: file.name.clone(),
            preview: file.data.clone(),
            word_count: word_count(&recognition.text),
            char_count: recognition.text.chars().count(),
            confidence: recognition.confidence.round() as i64,
            size: format_file_size(file.size()),
            text: recognition.text.clone(),
        }
    }

    pub fn title(&self) -> String {
        format!("Document Analysis: {}", self.file_name)
    }

    /// What the extracted-text panel shows, and what search sees.
    pub fn display_text(&self) -> &str {
        if self.text.is_empty() {
            NO_TEXT_DETECTED
        } else {
            &self.text
        }
    }

    pub fn download_name(&self) -> String {
        format!("{}_extracted.txt", self.file_name)
    }

    pub fn stats(&self) -> [(&'static str, String); 4] {
        [
            ("Words", self.word_count.to_string()),
            ("Characters", self.char_count.to_string()),
            ("Confidence", format!("{}%", self.confidence)),
            ("Size", self.size.clone()),
        ]
    }
}

/// Writes the extracted text next to other downloads and returns the path.
pub fn save_extracted_text(dir: &Path, analysis: &DocumentAnalysis) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(analysis.download_name());
    std::fs::write(&path, &analysis.text)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognition(text: &str, confidence: f32) -> Recognition {
        Recognition {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1000), "1000 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1_572_864), "1.5 MB");
        assert_eq!(format_file_size(1_234_567), "1.18 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3 GB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("image/png"), Some(AttachmentKind::Image));
        assert_eq!(classify("image/jpeg"), Some(AttachmentKind::Image));
        assert_eq!(classify("application/pdf"), Some(AttachmentKind::Pdf));
        assert_eq!(classify("text/plain"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_queue_accepts_png_and_rejects_text() {
        let mut queue = AttachmentQueue::new();
        assert!(queue.push(AttachedFile::new("shot.png", "image/png", vec![1])).is_ok());

        let rejected = queue.push(AttachedFile::new("notes.txt", "text/plain", vec![2])).unwrap_err();
        assert_eq!(rejected.name, "notes.txt");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.files()[0].name, "shot.png");
    }

    #[test]
    fn test_rejection_message_names_type() {
        assert_eq!(
            rejection_message("text/plain"),
            "Unsupported file type: text/plain. Please upload images (JPG, PNG, etc.) or PDFs."
        );
    }

    #[test]
    fn test_previews_truncate_and_remove() {
        let mut queue = AttachmentQueue::new();
        queue
            .push(AttachedFile::new("a-very-long-receipt-name-2024.png", "image/png", vec![]))
            .unwrap();
        queue.push(AttachedFile::new("scan.pdf", PDF_MEDIA_TYPE, vec![])).unwrap();

        let previews = queue.previews();
        assert_eq!(previews[0].label, "a-very-long-receipt-...");
        assert_eq!(previews[1].label, "scan.pdf");
        assert_eq!(previews[1].icon, "📄");

        assert_eq!(queue.remove(0).map(|f| f.name), Some("a-very-long-receipt-name-2024.png".to_string()));
        assert!(queue.remove(5).is_none());
        assert_eq!(queue.previews()[0].index, 0);
    }

    #[test]
    fn test_media_type_for_path() {
        assert_eq!(media_type_for_path(Path::new("a/b/photo.JPG")), "image/jpeg");
        assert_eq!(media_type_for_path(Path::new("x.png")), "image/png");
        assert_eq!(media_type_for_path(Path::new("doc.pdf")), PDF_MEDIA_TYPE);
        assert_eq!(media_type_for_path(Path::new("notes.txt")), "text/plain");
        assert_eq!(media_type_for_path(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_should_analyze_threshold() {
        assert!(!should_analyze("   0123456789   "));
        assert!(should_analyze("0123456789A"));
    }

    #[test]
    fn test_analysis_block_stats() {
        let file = AttachedFile::new("receipt.png", "image/png", vec![0; 1536]);
        let analysis = DocumentAnalysis::new(&file, &recognition("Total  due\n42.00 ", 87.6));

        assert_eq!(analysis.word_count, 3);
        assert_eq!(analysis.char_count, 17);
        assert_eq!(analysis.confidence, 88);
        assert_eq!(analysis.size, "1.5 KB");
        assert_eq!(analysis.preview.len(), 1536);
        assert_eq!(analysis.title(), "Document Analysis: receipt.png");
        assert_eq!(analysis.stats()[2].1, "88%");
    }

    #[test]
    fn test_preview_shares_file_buffer() {
        let file = AttachedFile::new("photo.png", "image/png", vec![7; 4096]);
        let analysis = DocumentAnalysis::new(&file, &recognition("text", 50.0));
        let copy = analysis.clone();

        assert_eq!(analysis.preview.as_ptr(), file.data.as_ptr());
        assert_eq!(copy.preview.as_ptr(), file.data.as_ptr());
    }

    #[test]
    fn test_empty_text_placeholder() {
        let file = AttachedFile::new("blank.png", "image/png", vec![]);
        let analysis = DocumentAnalysis::new(&file, &recognition("", 0.0));
        assert_eq!(analysis.display_text(), NO_TEXT_DETECTED);
    }

    #[test]
    fn test_analysis_prompt_mentions_file_and_text() {
        let prompt = analysis_prompt("Invoice #7", "inv.png");
        assert!(prompt.starts_with("I've extracted the following text from a document called \"inv.png\"."));
        assert!(prompt.contains("\n\nInvoice #7\n\n"));
        assert!(prompt.ends_with("4. Any notable patterns or insights"));
    }

    #[test]
    fn test_save_extracted_text() {
        let dir = tempfile::tempdir().unwrap();
        let file = AttachedFile::new("scan.png", "image/png", vec![]);
        let analysis = DocumentAnalysis::new(&file, &recognition("hello", 90.0));

        let path = save_extracted_text(dir.path(), &analysis).unwrap();
        assert_eq!(path.file_name().unwrap(), "scan.png_extracted.txt");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
