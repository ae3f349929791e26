use crate::error::IntakeError;
use std::path::{Component, Path, PathBuf};

/// Validate that a relative path stays inside the directory it is joined to
///
/// Prevents path traversal by:
/// - Rejecting absolute paths and drive prefixes
/// - Rejecting paths with ".." components
pub fn validate_relative_path(path: &Path) -> Result<PathBuf, IntakeError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(IntakeError::Validation(format!(
                    "Path contains '..' component: {}",
                    path.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(IntakeError::Validation(format!(
                    "Path must be relative: {}",
                    path.display()
                )));
            }
            Component::CurDir => {}
            Component::Normal(part) => clean.push(part),
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(IntakeError::Validation("Path is empty".to_string()));
    }

    Ok(clean)
}

/// Validate an upload against the size limit and allowed MIME types
pub fn validate_upload(
    content_type: &str,
    size: u64,
    max_size: u64,
    allowed_mime_types: &[String],
) -> Result<(), IntakeError> {
    if size == 0 {
        return Err(IntakeError::Validation("File is empty".to_string()));
    }

    if size > max_size {
        return Err(IntakeError::Validation(format!(
            "File size ({} bytes) exceeds maximum allowed size ({} bytes)",
            size, max_size
        )));
    }

    let mime = content_type.trim().to_ascii_lowercase();
    if !allowed_mime_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&mime))
    {
        return Err(IntakeError::Validation(format!(
            "Invalid file type '{}'. Only image files are allowed.",
            content_type
        )));
    }

    Ok(())
}

/// Loose email shape check: one '@', non-empty local part, dotted domain
pub fn validate_email(email: &str) -> Result<(), IntakeError> {
    let invalid = || IntakeError::Validation(format!("Invalid email address: {}", email));

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> Vec<String> {
        vec!["image/jpeg".to_string(), "image/png".to_string()]
    }

    #[test]
    fn test_validate_path_with_parent_dir() {
        let result = validate_relative_path(Path::new("item-images/../../etc/passwd"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("'..' component"));
    }

    #[test]
    fn test_validate_absolute_path() {
        assert!(validate_relative_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_validate_relative_path_normalizes() {
        let path = validate_relative_path(Path::new("./serial-numbers/label.png")).unwrap();
        assert_eq!(path, PathBuf::from("serial-numbers/label.png"));
    }

    #[test]
    fn test_validate_upload_exceeds_limit() {
        let result = validate_upload("image/png", 2000, 1024, &images());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_upload_rejects_mime() {
        let result = validate_upload("application/pdf", 10, 1024, &images());
        assert!(result.unwrap_err().to_string().contains("Only image files"));
    }

    #[test]
    fn test_validate_upload_within_limit() {
        assert!(validate_upload("IMAGE/PNG", 10, 1024, &images()).is_ok());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("packer@example.com").is_ok());
        assert!(validate_email("packer@example").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }
}
