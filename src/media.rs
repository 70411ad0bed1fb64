use crate::types::{ApiError, ValidationError};
use log::{info, warn};
use rocket::fs::TempFile;
use rocket::tokio::fs;
use rocket::tokio::io::AsyncReadExt;
use std::io::ErrorKind;
use std::path::Path;

/// Uploaded post images live under `<media_dir>/posts`.
pub const UPLOAD_TO: &str = "posts";

// Enough bytes to recognise every signature `image` knows about.
const SIGNATURE_LEN: u64 = 32;

pub fn url(relative: &str) -> String {
    format!("/media/{}", relative)
}

fn is_empty(file: &TempFile<'_>) -> bool {
    file.len() == 0
}

/// Errors for an upload that is not an image. Both the declared content type
/// and the leading bytes of the file have to say so.
pub async fn validate_image(file: Option<&TempFile<'_>>) -> Result<ValidationError, ApiError> {
    let mut errors = ValidationError::default();
    let file = match file {
        Some(file) if !is_empty(file) => file,
        _ => return Ok(errors),
    };

    let declared = file
        .content_type()
        .map_or(false, |content_type| content_type.top() == "image");
    let mut head = Vec::new();
    file.open()
        .await?
        .take(SIGNATURE_LEN)
        .read_to_end(&mut head)
        .await?;

    if !declared || image::guess_format(&head).is_err() {
        errors.add_error(
            "image",
            "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
        );
    }
    Ok(errors)
}

fn file_name(file: &TempFile<'_>) -> (String, String) {
    let stem = file
        .name()
        .filter(|name| !name.is_empty())
        .unwrap_or("image")
        .to_string();
    let extension = file
        .content_type()
        .and_then(|content_type| content_type.extension())
        .map(|ext| ext.as_str().to_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    (stem, extension)
}

/// Copies an uploaded image into the media directory and returns its path
/// relative to it. A missing or empty upload stores nothing.
pub async fn store_image(
    media_dir: &Path,
    file: Option<&mut TempFile<'_>>,
) -> Result<Option<String>, ApiError> {
    let file = match file {
        Some(file) if !is_empty(file) => file,
        _ => return Ok(None),
    };
    let directory = media_dir.join(UPLOAD_TO);
    fs::create_dir_all(&directory).await?;

    // The name is claimed with `create_new`, two uploads never share a file.
    let (stem, extension) = file_name(file);
    let mut n = 0;
    let name = loop {
        let name = match n {
            0 => format!("{}.{}", stem, extension),
            n => format!("{}_{}.{}", stem, n, extension),
        };
        let claimed = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(directory.join(&name))
            .await;
        match claimed {
            Ok(_) => break name,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    };

    let path = directory.join(&name);
    if let Err(e) = file.move_copy_to(&path).await {
        let _ = fs::remove_file(&path).await;
        return Err(e.into());
    }
    info!("stored upload {}/{}", UPLOAD_TO, name);
    Ok(Some(format!("{}/{}", UPLOAD_TO, name)))
}

/// Removes a stored upload whose post was never saved.
pub async fn discard(media_dir: &Path, relative: &str) {
    if let Err(e) = fs::remove_file(media_dir.join(relative)).await {
        warn!("cannot remove orphaned upload {}: {}", relative, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_point_under_media() {
        assert_eq!(url("posts/image.png"), "/media/posts/image.png");
    }

    #[test]
    fn signatures_tell_images_from_scripts() {
        assert!(image::guess_format(crate::testing::GIF).is_ok());
        assert!(image::guess_format(b"#!/bin/sh\nrm -rf /\n").is_err());
    }

    #[rocket::async_test]
    async fn discard_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let posts = dir.path().join(UPLOAD_TO);
        fs::create_dir_all(&posts).await.unwrap();
        fs::write(posts.join("orphan.png"), b"x").await.unwrap();

        discard(dir.path(), "posts/orphan.png").await;
        assert!(!posts.join("orphan.png").exists());
    }
}
