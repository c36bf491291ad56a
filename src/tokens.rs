//! Hidden form values the publish form expects back unchanged.
//!
//! The platform renders these as `<input type="hidden" ...>` elements on the
//! page reached after choosing a category. They are matched with patterns
//! anchored on the literal markup instead of a parsed DOM; any change in
//! attribute order or quoting surfaces as [`TokenError::Incomplete`].

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::sync::Arc;
use thiserror::Error;

/// Field name and the markup fragment carrying its value, in submission order.
pub const PLATFORM_FIELDS: &[(&str, &str)] = &[
    (
        "submitTakoj",
        r#"<input type="hidden" name="submitTakoj" id="submitTakoj" value="(.*?)" />"#,
    ),
    (
        "listItemId",
        r#"<input type="hidden" name="listItemId" id="listItemId" value="(.*?)" />"#,
    ),
    (
        "lPreverjeni",
        r#"<input type="hidden" name="lPreverjeni" id="lPreverjeni" value="(.*?)" />"#,
    ),
    (
        "lShop",
        r#"<input type="hidden" name="lShop" id="lShop" value="(.*?)">"#,
    ),
    (
        "uploader_id",
        r#"<input type="hidden" name="uploader_id" id="uploader_id" value="(.*?)" />"#,
    ),
    ("novo", r#"<input type="hidden" name="novo" value="(.*?)" />"#),
    (
        "adPlacementPrice",
        r#"<input type="hidden" name="adPlacementPrice" id="adPlacementPrice" value="(.*?)" />"#,
    ),
    (
        "adPlacementDiscount",
        r#"<input type="hidden" name="adPlacementDiscount" id="adPlacementDiscount" value="(.*?)" />"#,
    ),
    ("nDays", r#"<input type="hidden" name="nDays" value="(.*?)" />"#),
    (
        "spremeni",
        r#"<input type="hidden" name="spremeni" value="(.*?)" />"#,
    ),
    ("new", r#"<input type="hidden" name="new" value="(.*?)" />"#),
    (
        "nKatID",
        r#"<input name="nKatID" id="nKatID" type="hidden" size="5" value="(.*?)" />"#,
    ),
    (
        "nNadKatID",
        r#"<input name="nNadKatID" id="nNadKatID" type="hidden" size="5" value="(.*?)" />"#,
    ),
    (
        "nMainKatID",
        r#"<input name="nMainKatID" id="nMainKatID" type="hidden" size="5" value="(.*?)" />"#,
    ),
    (
        "nPath",
        r#"<input name="nPath" id="nPath" disable="false" type="hidden" value="(.*?)" />"#,
    ),
    (
        "nHide",
        r#"<input name="nHide" id="nHide" type="hidden" value="(.*?)" />"#,
    ),
    (
        "nPrekrij",
        r#"<input style="display:none;" type="hidden" name="nPrekrij" value="(.*?)" />"#,
    ),
    (
        "nStep",
        r#"<input style="display:none;" type="hidden" name="nStep" value="(.*?)" />"#,
    ),
    (
        "lNonJava",
        r#"<input style="display:none;" type="hidden" name="lNonJava" value="(.*?)" />"#,
    ),
    (
        "ukaz",
        r#"<input style="display:none;" type="hidden" name="ukaz" value="(.*?)" />"#,
    ),
    (
        "bShowForm",
        r#"<input style="display:none;" type="hidden" name="bShowForm" id=bShowForm value="(.*?)" />"#,
    ),
    (
        "lEdit",
        r#"<input style="display:none;" type="hidden" name="lEdit" value="(.*?)" />"#,
    ),
];

static PLATFORM_EXTRACTOR: Lazy<Arc<PatternExtractor>> = Lazy::new(|| {
    Arc::new(PatternExtractor::new(PLATFORM_FIELDS).expect("platform token patterns compile"))
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("page is missing hidden fields: {}", missing.join(", "))]
    Incomplete { missing: Vec<String> },
}

/// Complete set of extracted hidden values. Only constructed when every
/// configured field matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    entries: Vec<(String, String)>,
}

impl TokenSet {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub trait TokenExtractor: Send + Sync {
    fn extract(&self, body: &[u8]) -> Result<TokenSet, TokenError>;
}

pub struct PatternExtractor {
    fields: Vec<(String, Regex)>,
}

impl PatternExtractor {
    pub fn new(fields: &[(&str, &str)]) -> Result<Self, regex::Error> {
        let fields = fields
            .iter()
            .map(|(name, pattern)| Ok((name.to_string(), Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { fields })
    }
}

impl TokenExtractor for PatternExtractor {
    fn extract(&self, body: &[u8]) -> Result<TokenSet, TokenError> {
        let mut entries = Vec::with_capacity(self.fields.len());
        let mut missing = Vec::new();
        for (name, pattern) in &self.fields {
            match pattern.captures(body).and_then(|caps| caps.get(1)) {
                Some(value) => entries.push((
                    name.clone(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(TokenError::Incomplete { missing });
        }
        Ok(TokenSet { entries })
    }
}

pub fn platform_extractor() -> Arc<dyn TokenExtractor> {
    PLATFORM_EXTRACTOR.clone()
}

/// Renders a page carrying every platform field; `value_for` supplies each value.
#[cfg(test)]
pub fn render_token_page(value_for: impl Fn(&str) -> String) -> String {
    let mut page = String::from("<html><body><form id=\"oddaj\">\n");
    for (name, pattern) in PLATFORM_FIELDS {
        page.push_str(&pattern.replace("(.*?)", &value_for(name)));
        page.push('\n');
    }
    page.push_str("</form></body></html>");
    page
}
