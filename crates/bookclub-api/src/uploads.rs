use std::path::Path;

use anyhow::Context;
use uuid::Uuid;

/// Avatar used when no image file is uploaded.
pub const DEFAULT_IMAGE: &str = "/uploads/default-avatar.png";

/// Write an uploaded image under the uploads directory and return the public
/// path stored in records (`/uploads/<filename>`). Filenames are prefixed
/// with a uuid so concurrent uploads of the same name never collide.
pub async fn save_image(
    upload_dir: &Path,
    original_name: &str,
    data: &[u8],
) -> anyhow::Result<String> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("creating upload dir {}", upload_dir.display()))?;

    let filename = format!("{}_{}", Uuid::new_v4(), sanitize_filename(original_name));
    let path = upload_dir.join(&filename);

    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("writing upload {}", path.display()))?;

    Ok(format!("/uploads/{}", filename))
}

/// Strip anything that could escape the uploads directory or confuse the
/// static file service.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("cover photo.png"), "cover_photo.png");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[tokio::test]
    async fn save_image_writes_under_uploads_path() {
        let dir = std::env::temp_dir().join(format!("bookclub-uploads-{}", Uuid::new_v4()));

        let public = save_image(&dir, "cover.png", b"not-actually-a-png").await.unwrap();
        assert!(public.starts_with("/uploads/"));
        assert!(public.ends_with("_cover.png"));

        let on_disk = dir.join(public.strip_prefix("/uploads/").unwrap());
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"not-actually-a-png");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
