//! Inline image encoding for vision prompts.

use std::path::Path;

use base64::Engine;

use super::types::ContentPart;
use crate::error::ImageError;

/// MIME type for an image path, chosen from its extension.
///
/// Unknown extensions are sent as PNG, which is what the recorder emits.
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Build a `data:<mime>;base64,<payload>` URI from raw bytes.
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime, encoded)
}

/// Read an image file and encode it as a data URI.
pub async fn encode_image(path: &Path) -> Result<String, ImageError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ImageError::NotFound(path.to_path_buf())
        } else {
            ImageError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    Ok(data_uri(mime_type_for(path), &bytes))
}

/// Read an image file into a high-detail image content part.
pub async fn image_part(path: &Path) -> Result<ContentPart, ImageError> {
    Ok(ContentPart::image(encode_image(path).await?))
}

/// Encode several images, preserving order.
pub async fn image_parts<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ContentPart>, ImageError> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        parts.push(image_part(path.as_ref()).await?);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for(Path::new("a/shot_1.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("shot.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("shot.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("shot.webp")), "image/webp");
        assert_eq!(mime_type_for(Path::new("shot")), "image/png");
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_encode_image_reads_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("step_0.jpg");
        std::fs::write(&path, b"abc").expect("write image");

        let uri = encode_image(&path).await.expect("encode");
        assert_eq!(uri, "data:image/jpeg;base64,YWJj");
    }

    #[tokio::test]
    async fn test_encode_missing_image_is_not_found() {
        let err = encode_image(&PathBuf::from("/nonexistent/shot_3.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }
}
