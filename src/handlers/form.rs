// Multipart form collection shared by the upload endpoints.

use axum::extract::Multipart;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::services::ImageId;
use crate::uploads::Attachment;

/// Text fields and file parts of one multipart request, in arrival order
#[derive(Debug, Default)]
pub struct FormParts {
    fields: HashMap<String, Vec<String>>,
    files: Vec<Attachment>,
}

impl FormParts {
    /// Drain the request. File parts are only accepted under `file_field`, and at
    /// most `max_files` of them; text parts with other names are kept but unused.
    pub async fn collect(mut multipart: Multipart, file_field: &str, max_files: usize) -> Result<Self, ApiError> {
        let mut parts = FormParts::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    if name != file_field && name != format!("{}[]", file_field) {
                        return Err(ApiError::field_error(
                            &name,
                            format!("Files are only accepted under '{}'", file_field),
                        ));
                    }
                    let bytes = field.bytes().await?;

                    // Browsers send an empty part for an untouched file input
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    if parts.files.len() == max_files {
                        return Err(ApiError::field_error(
                            file_field,
                            format!("At most {} files may be uploaded per request", max_files),
                        ));
                    }

                    parts.files.push(Attachment::new(file_name, bytes));
                }
                None => {
                    let value = field.text().await?;
                    parts.fields.entry(name).or_default().push(value);
                }
            }
        }

        Ok(parts)
    }

    /// Last value sent for a text field
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(|values| values.last().cloned())
    }

    /// Every value sent under `name` or `name[]`
    pub fn all(&self, name: &str) -> Vec<&str> {
        let bracketed = format!("{}[]", name);
        [name, bracketed.as_str()]
            .iter()
            .filter_map(|key| self.fields.get(*key))
            .flatten()
            .map(String::as_str)
            .collect()
    }

    pub fn into_files(self) -> Vec<Attachment> {
        self.files
    }

    /// Retained image ids. Each value may be a single id, a comma list or a JSON array.
    pub fn image_ids(&self, name: &str) -> Result<Vec<ImageId>, ApiError> {
        let mut ids = Vec::new();
        for raw in self.all(name) {
            let raw = raw.trim();
            if raw.starts_with('[') {
                let values: Vec<Value> = serde_json::from_str(raw)
                    .map_err(|_| ApiError::field_error(name, "Expected a JSON array of image ids"))?;
                ids.extend(values.iter().filter_map(ImageId::from_value));
            } else {
                ids.extend(raw.split(',').filter_map(ImageId::parse));
            }
        }
        Ok(ids)
    }
}
