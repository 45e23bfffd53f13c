use tracing::warn;

use crate::caption::{self, CaptionRecord};
use crate::error::AppError;
use crate::pipeline;
use crate::store::ObjectStore;

fn is_image_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

fn is_conforming_key(key: &str) -> bool {
    is_image_key(key) || key.to_lowercase().ends_with(".json")
}

/// Deletes every object that is neither an image nor a caption record.
/// Housekeeping is deliberately separate from `list`; deletes are
/// best-effort and a failed one is skipped, not fatal.
pub async fn prune_invalid(store: &dyn ObjectStore) -> Result<usize, AppError> {
    let keys = store.list().await?;
    let mut deleted = 0;
    for key in keys.iter().filter(|k| !is_conforming_key(k)) {
        match store.delete(key).await {
            Ok(()) => {
                warn!(%key, "pruned nonconforming object");
                deleted += 1;
            }
            Err(e) => warn!(%key, error = %e, "failed to prune nonconforming object"),
        }
    }
    Ok(deleted)
}

/// Image keys only, sorted. Caption records stay in the store but are never
/// listed as gallery entries.
pub async fn list_selectable(store: &dyn ObjectStore) -> Result<Vec<String>, AppError> {
    let mut keys: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|k| is_image_key(k))
        .collect();
    keys.sort();
    Ok(keys)
}

/// Fetches the caption record paired with `image_key`. A missing or
/// unreadable record degrades to the fallback pair; browsing never fails on
/// an orphaned image.
pub async fn select(store: &dyn ObjectStore, image_key: &str) -> CaptionRecord {
    let record_key = pipeline::record_key(image_key);
    match store.read_text(&record_key).await {
        Ok(text) => caption::parse_stored(&text),
        Err(AppError::NotFound(_)) => CaptionRecord::fallback(),
        Err(e) => {
            warn!(key = %record_key, error = %e, "caption record unreadable");
            CaptionRecord::fallback()
        }
    }
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encodes a value for use in a redirect query string.
pub fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Renders the whole gallery page: upload form, one selection form per image,
/// an optional inline error notice, and the selected image fragment.
pub fn render_index(
    images: &[String],
    selection: Option<(&str, &CaptionRecord)>,
    error_notice: Option<&str>,
) -> String {
    let mut page = String::from(
        r#"<link rel="stylesheet" type="text/css" href="/static/styles.css">
<form method="post" enctype="multipart/form-data" action="/upload">
  <div>
    <label for="file">Choose file to upload</label>
    <input type="file" id="file" name="form_file" accept="image/jpeg"/>
  </div>
  <div>
    <button>Submit</button>
  </div>
</form>
"#,
    );

    if let Some(notice) = error_notice {
        page.push_str(&format!(
            "<p class=\"error-notice\">{}</p>\n",
            escape_html(notice)
        ));
    }

    for image in images {
        let name = escape_html(image);
        page.push_str(&format!(
            r#"<form method="post" action="/display-image">
<input type="hidden" name="file" value="{name}">
  <li>
    <button type="submit">{name}</button>
  </li>
</form>
"#,
        ));
    }

    if let Some((image_key, record)) = selection {
        page.push_str(&render_selection(image_key, record));
    }

    page
}

fn render_selection(image_key: &str, record: &CaptionRecord) -> String {
    format!(
        r#"<div class="displayed-image">
  <h3 class="aiText">{title}</h3>
  <img class="selectedImage" src="/get-image/{key}" />
  <h4 class="aiText">{description}</h4>
</div>
"#,
        title = escape_html(&record.title),
        key = escape_html(image_key),
        description = escape_html(&record.description),
    )
}
