use std::io::ErrorKind;
use std::path::Path;

use eyre::{Result, bail, eyre};
use regex::Regex;
use tokio::process::Command;

const TESSERACT: &str = "tesseract";

/// Extract text from an image using the local `tesseract` binary.
///
/// The image is passed as-is; tesseract writes the recognised text to stdout.
/// Runs of spaces are collapsed and blank lines dropped, so the result can be
/// sent as an ordinary chat message.
///
/// # Errors
///
/// Returns an error if:
/// - The image does not exist or is not a file
/// - tesseract is not installed or exits with a failure
/// - No text was recognised
pub async fn extract_text(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Image not found: {}", path.display());
    }
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }

    tracing::debug!("Running OCR on {}", path.display());

    let output = Command::new(TESSERACT)
        .arg(path)
        .arg("stdout")
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => eyre!("OCR requires the '{}' binary on PATH", TESSERACT),
            _ => eyre!("Failed to run {}: {}", TESSERACT, e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("OCR failed ({}): {}", output.status, stderr.trim());
    }

    let text = normalize(&String::from_utf8_lossy(&output.stdout))?;
    if text.is_empty() {
        bail!("No text found in {}", path.display());
    }
    Ok(text)
}

fn normalize(raw: &str) -> Result<String> {
    let spaces = Regex::new(r"[ \t]+")?;
    Ok(raw
        .lines()
        .map(|line| spaces.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}
