use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use image::GenericImageView;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::RecognizeError;

/// Text found in one image, with the recognizer's mean confidence (0-100).
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// Fractional progress, `0.0..=1.0`.
pub type Progress<'a> = &'a mut (dyn FnMut(f32) + Send);

pub type RecognizeFuture<'a> = Pin<Box<dyn Future<Output = Result<Recognition, RecognizeError>> + Send + 'a>>;

pub trait Recognizer: Send + Sync {
    fn recognize<'a>(&'a self, image: &'a [u8], progress: Progress<'a>) -> RecognizeFuture<'a>;
}

/// Runs the `tesseract` CLI on a normalised PNG piped through stdin.
pub struct TesseractRecognizer {
    binary: String,
    language: String,
    max_dimension: u32,
}

impl TesseractRecognizer {
    pub fn with_config(config: &OcrConfig) -> Self {
        TesseractRecognizer {
            binary: config.tesseract.clone(),
            language: config.language.clone(),
            max_dimension: config.max_image_dimension,
        }
    }

    async fn run(&self, image: &[u8], progress: Progress<'_>) -> Result<Recognition, RecognizeError> {
        progress(0.0);
        let png = prepare_image(image, self.max_dimension)?;
        progress(0.25);

        let mut child = Command::new(&self.binary)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
            stdin.shutdown().await?;
        }
        progress(0.5);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RecognizeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        progress(0.9);

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(
            chars = recognition.text.len(),
            confidence = recognition.confidence,
            "tesseract finished"
        );
        progress(1.0);
        Ok(recognition)
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize<'a>(&'a self, image: &'a [u8], progress: Progress<'a>) -> RecognizeFuture<'a> {
        Box::pin(self.run(image, progress))
    }
}

/// Decodes any supported image, shrinks it to fit `max_dimension` and
/// re-encodes it as PNG for the recognizer.
pub fn prepare_image(data: &[u8], max_dimension: u32) -> Result<Vec<u8>, RecognizeError> {
    let mut img = image::load_from_memory(data)?;

    let (width, height) = img.dimensions();
    if width > max_dimension || height > max_dimension {
        let scale = (max_dimension as f32 / width as f32).min(max_dimension as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).max(1);
        let new_height = ((height as f32 * scale) as u32).max(1);
        tracing::debug!("resizing {}x{} to {}x{}", width, height, new_width, new_height);
        img = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);
    }

    let mut buffer = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
    Ok(buffer)
}

/// Rebuilds text and mean word confidence from tesseract's TSV output.
///
/// Words on one line are joined by spaces; a new line starts a new text
/// line and a new paragraph or block leaves a blank line.
pub fn parse_tsv(tsv: &str) -> Result<Recognition, RecognizeError> {
    let mut lines = tsv.lines();
    let header = lines
        .next()
        .ok_or_else(|| RecognizeError::Output("empty output".to_string()))?;
    let columns: Vec<&str> = header.split('\t').collect();
    let col = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| RecognizeError::Output(format!("missing column {}", name)))
    };
    let (level, block, par, line_num, conf, text_col) = (
        col("level")?,
        col("block_num")?,
        col("par_num")?,
        col("line_num")?,
        col("conf")?,
        col("text")?,
    );
    let widest = [level, block, par, line_num, conf, text_col].into_iter().max().unwrap_or(text_col);

    let mut text = String::new();
    let mut last_line: Option<(&str, &str, &str)> = None;
    let mut confidence_sum = 0.0f32;
    let mut words = 0usize;

    for row in lines {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() <= widest || fields[level] != "5" {
            continue;
        }
        let word = fields[text_col].trim();
        let word_conf: f32 = fields[conf].trim().parse().unwrap_or(-1.0);
        if word.is_empty() || word_conf < 0.0 {
            continue;
        }

        let key = (fields[block], fields[par], fields[line_num]);
        match last_line {
            Some(prev) if prev == key => text.push(' '),
            Some(prev) if prev.0 == key.0 && prev.1 == key.1 => text.push('\n'),
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        last_line = Some(key);

        text.push_str(word);
        confidence_sum += word_conf;
        words += 1;
    }

    let confidence = if words == 0 { 0.0 } else { confidence_sum / words as f32 };
    Ok(Recognition { text, confidence })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
2\t1\t1\t0\t0\t0\t10\t10\t300\t40\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t80\t20\t96.5\tTotal
5\t1\t1\t1\t1\t2\t95\t10\t60\t20\t91.0\tdue:
5\t1\t1\t1\t2\t1\t10\t35\t70\t20\t88.5\t$42.00
5\t1\t2\t1\t1\t1\t10\t80\t70\t20\t80.0\tThanks
5\t1\t2\t1\t1\t2\t90\t80\t10\t20\t-1\t ";

    #[test]
    fn test_parse_tsv_rebuilds_lines() {
        let recognition = parse_tsv(TSV).unwrap();
        assert_eq!(recognition.text, "Total due:\n$42.00\n\nThanks");
        assert!((recognition.confidence - 89.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_tsv_without_words() {
        let header_only = TSV.lines().next().unwrap();
        let recognition = parse_tsv(header_only).unwrap();
        assert_eq!(recognition.text, "");
        assert_eq!(recognition.confidence, 0.0);
    }

    #[test]
    fn test_parse_tsv_skips_short_rows_in_any_column_order() {
        let tsv = "text\tlevel\tblock_num\tpar_num\tline_num\tconf
Hello\t5\t1\t1\t1\t90
cut\t5
world\t5\t1\t1\t1\t80";
        let recognition = parse_tsv(tsv).unwrap();
        assert_eq!(recognition.text, "Hello world");
        assert_eq!(recognition.confidence, 85.0);
    }

    #[test]
    fn test_parse_tsv_rejects_garbage() {
        assert!(parse_tsv("").is_err());
        assert!(parse_tsv("Error opening data file").is_err());
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_prepare_image_shrinks_large_images() {
        let out = prepare_image(&png(400, 200), 100).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[test]
    fn test_prepare_image_keeps_small_images() {
        let out = prepare_image(&png(40, 20), 100).unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!(img.dimensions(), (40, 20));
    }

    #[test]
    fn test_prepare_image_rejects_non_images() {
        assert!(matches!(prepare_image(b"not an image", 100), Err(RecognizeError::Image(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let recognizer = TesseractRecognizer::with_config(&OcrConfig {
            tesseract: "definitely-not-a-real-tesseract-binary".to_string(),
            ..OcrConfig::default()
        });
        let mut seen = Vec::new();
        let result = recognizer
            .recognize(&png(10, 10), &mut |p: f32| seen.push(p))
            .await;
        assert!(matches!(result, Err(RecognizeError::Io(_))));
        assert_eq!(seen, vec![0.0, 0.25]);
    }
}
