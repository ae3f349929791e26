//! Parsing of the multipart parcel intake form.

use crate::config::UploadsConfig;
use crate::error::{IntakeError, Result};
use crate::parcels::{Channel, NewParcel};
use crate::storage::UploadFile;
use bytes::BufMut;
use futures_util::TryStreamExt;
use warp::multipart::{FormData, Part};

pub const TRACKING_BARCODE_FIELD: &str = "trackingBarcode";
pub const PARCEL_IMAGES_FIELD: &str = "parcelImages";

/// Room for the text fields on top of the files
const FORM_OVERHEAD: u64 = 64 * 1024;

/// Largest request body the intake form accepts
pub fn max_form_size(uploads: &UploadsConfig) -> u64 {
    uploads.max_file_size * uploads.max_files as u64 + FORM_OVERHEAD
}

async fn read_part(part: Part) -> Result<Vec<u8>> {
    part.stream()
        .try_fold(Vec::new(), |mut bytes, buf| async move {
            bytes.put(buf);
            Ok(bytes)
        })
        .await
        .map_err(|e| IntakeError::Validation(format!("Malformed multipart body: {}", e)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collect the form into a [`NewParcel`].
///
/// Exactly one `trackingBarcode` file is required; `parcelImages` may repeat
/// up to `max_parcel_images` times. Files under any other name are rejected.
pub async fn parse_parcel_form(form: FormData, uploads: &UploadsConfig) -> Result<NewParcel> {
    let mut parcel = NewParcel::default();
    let mut files = 0usize;
    let mut parts = form;

    while let Some(part) = parts
        .try_next()
        .await
        .map_err(|e| IntakeError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let name = part.name().to_string();

        if let Some(filename) = part.filename().map(str::to_string) {
            files += 1;
            if files > uploads.max_files {
                return Err(IntakeError::Validation(format!(
                    "Too many files; at most {} are accepted",
                    uploads.max_files
                )));
            }
            let content_type = part
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let file = UploadFile::new(filename, content_type, read_part(part).await?);

            match name.as_str() {
                TRACKING_BARCODE_FIELD => {
                    if parcel.tracking_barcode.is_some() {
                        return Err(IntakeError::Validation(
                            "Only one tracking barcode image is accepted".to_string(),
                        ));
                    }
                    parcel.tracking_barcode = Some(file);
                }
                PARCEL_IMAGES_FIELD => {
                    if parcel.parcel_images.len() >= uploads.max_parcel_images {
                        return Err(IntakeError::Validation(format!(
                            "At most {} parcel images are accepted",
                            uploads.max_parcel_images
                        )));
                    }
                    parcel.parcel_images.push(file);
                }
                other => {
                    return Err(IntakeError::Validation(format!(
                        "Unexpected file field '{}'",
                        other
                    )))
                }
            }
            continue;
        }

        let bytes = read_part(part).await?;
        let value = String::from_utf8(bytes).map_err(|_| {
            IntakeError::Validation(format!("Field '{}' is not valid UTF-8", name))
        })?;

        match name.as_str() {
            "trackingNumber" => parcel.tracking_number = non_empty(value),
            "description" => parcel.description = non_empty(value),
            "category" => parcel.category = non_empty(value),
            "sourcedBy" => parcel.sourced_by = non_empty(value),
            "provider" => parcel.provider = non_empty(value),
            "channel" => {
                parcel.channel = non_empty(value)
                    .map(|v| v.parse::<Channel>())
                    .transpose()?
            }
            "quantity" => {
                parcel.quantity = non_empty(value)
                    .map(|v| {
                        v.parse::<i64>().map_err(|_| {
                            IntakeError::Validation(format!("Invalid quantity '{}'", v))
                        })
                    })
                    .transpose()?
            }
            // Unknown text fields are ignored
            _ => {}
        }
    }

    if parcel.tracking_barcode.is_none() {
        return Err(IntakeError::Validation(
            "Tracking barcode image is required".to_string(),
        ));
    }
    Ok(parcel)
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Hand-built multipart body for warp test requests
    pub struct MultipartBody {
        boundary: String,
        body: Vec<u8>,
    }

    impl MultipartBody {
        pub fn new() -> Self {
            Self {
                boundary: "----parcel-intake-boundary".to_string(),
                body: Vec::new(),
            }
        }

        pub fn text(mut self, name: &str, value: &str) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    self.boundary, name, value
                )
                .as_bytes(),
            );
            self
        }

        pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    self.boundary, name, filename, content_type
                )
                .as_bytes(),
            );
            self.body.extend_from_slice(bytes);
            self.body.extend_from_slice(b"\r\n");
            self
        }

        pub fn content_type(&self) -> String {
            format!("multipart/form-data; boundary={}", self.boundary)
        }

        pub fn finish(mut self) -> (String, Vec<u8>) {
            self.body
                .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
            (self.content_type(), self.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MultipartBody;
    use super::*;
    use warp::Filter;

    async fn parse(body: MultipartBody) -> Result<NewParcel> {
        let (content_type, body) = body.finish();
        let uploads = UploadsConfig::default();
        let form = warp::test::request()
            .method("POST")
            .header("content-type", content_type)
            .body(body)
            .filter(&warp::multipart::form())
            .await
            .unwrap();
        parse_parcel_form(form, &uploads).await
    }

    #[tokio::test]
    async fn test_parses_files_and_fields() {
        let parcel = parse(
            MultipartBody::new()
                .file(TRACKING_BARCODE_FIELD, "label.png", "image/png", b"label")
                .file(PARCEL_IMAGES_FIELD, "a.jpg", "image/jpeg", b"a")
                .file(PARCEL_IMAGES_FIELD, "b.jpg", "image/jpeg", b"b")
                .text("description", "  Red box ")
                .text("channel", "Taobao")
                .text("quantity", "3")
                .text("trackingNumber", ""),
        )
        .await
        .unwrap();

        let barcode = parcel.tracking_barcode.unwrap();
        assert_eq!(barcode.original_name, "label.png");
        assert_eq!(barcode.bytes, b"label");
        assert_eq!(parcel.parcel_images.len(), 2);
        assert_eq!(parcel.description.as_deref(), Some("Red box"));
        assert_eq!(parcel.channel, Some(Channel::Taobao));
        assert_eq!(parcel.quantity, Some(3));
        assert_eq!(parcel.tracking_number, None);
    }

    #[tokio::test]
    async fn test_requires_barcode() {
        let err = parse(MultipartBody::new().text("description", "no label"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Tracking barcode image is required"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_file_field_and_bad_quantity() {
        let err = parse(
            MultipartBody::new()
                .file(TRACKING_BARCODE_FIELD, "label.png", "image/png", b"label")
                .file("avatar", "me.png", "image/png", b"me"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("avatar"));

        let err = parse(
            MultipartBody::new()
                .file(TRACKING_BARCODE_FIELD, "label.png", "image/png", b"label")
                .text("quantity", "lots"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
    }
}
