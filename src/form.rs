use crate::models::{Account, AdDraft, ListingId};
use crate::tokens::TokenSet;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Listing-type marker for a regular classified ad.
const LISTING_TYPE: &str = "O";
const IMAGE_FIELD: &str = "aSlikeUpload";
const IMAGE_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum FormError {
    #[error("cannot read image {path}: {message}")]
    ImageRead { path: PathBuf, message: String },
    #[error("invalid multipart part `{name}`: {message}")]
    InvalidPart { name: String, message: String },
}

pub type UrlEncoded = Vec<(&'static str, String)>;

pub fn login_form(account: &Account) -> UrlEncoded {
    vec![
        ("username", account.username.clone()),
        ("password", account.password.clone()),
        ("rememberMe", "true".to_string()),
    ]
}

pub fn category_form(category_id: &str) -> UrlEncoded {
    vec![("categoryId", category_id.to_string())]
}

/// Bulk removal takes every id in one comma-joined field.
pub fn removal_form(ids: &[ListingId]) -> UrlEncoded {
    let joined = ids
        .iter()
        .map(ListingId::as_str)
        .collect::<Vec<_>>()
        .join(",");
    vec![("IDS", joined)]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    Text(String),
    File { file_name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub body: PartBody,
}

/// Ordered plan of the final publish submission. Text fields first, then the
/// image parts, then one empty image part that terminates the list.
#[derive(Debug, Default)]
pub struct PublishForm {
    parts: Vec<FormPart>,
    images: usize,
}

impl PublishForm {
    pub fn with_fields(tokens: &TokenSet, ad: &AdDraft) -> Self {
        let mut form = Self::default();
        for (name, value) in tokens.iter() {
            form.push_text(name, value);
        }
        form.push_text("cNaziv", &ad.title);
        form.push_text("cOpis", &ad.description);
        form.push_text("nCenaStart", &ad.price);
        form.push_text("nKatID", &ad.category_id);
        form.push_text("cTip", LISTING_TYPE);
        form
    }

    /// Reads every image before adding any part, so a failure leaves the form
    /// without images. Returns the number of images attached.
    pub async fn attach_images(&mut self, paths: &[PathBuf]) -> Result<usize, FormError> {
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|err| FormError::ImageRead {
                    path: path.clone(),
                    message: err.to_string(),
                })?;
            loaded.push((file_name(path), bytes));
        }

        for (file_name, bytes) in loaded {
            let name = image_field(self.images);
            self.parts.push(FormPart {
                name,
                body: PartBody::File { file_name, bytes },
            });
            self.images += 1;
        }
        self.parts.push(FormPart {
            name: image_field(self.images),
            body: PartBody::File {
                file_name: String::new(),
                bytes: Vec::new(),
            },
        });
        Ok(self.images)
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn image_parts(&self) -> impl Iterator<Item = &FormPart> {
        self.parts
            .iter()
            .filter(|part| matches!(part.body, PartBody::File { .. }))
    }

    pub fn into_multipart(self) -> Result<Form, FormError> {
        let mut form = Form::new();
        for FormPart { name, body } in self.parts {
            form = match body {
                PartBody::Text(value) => form.text(name, value),
                PartBody::File { file_name, bytes } => {
                    let part = Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(IMAGE_MIME)
                        .map_err(|err| FormError::InvalidPart {
                            name: name.clone(),
                            message: err.to_string(),
                        })?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }

    fn push_text(&mut self, name: &str, value: &str) {
        self.parts.push(FormPart {
            name: name.to_string(),
            body: PartBody::Text(value.to_string()),
        });
    }
}

fn image_field(index: usize) -> String {
    format!("{IMAGE_FIELD}[{index}]")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
