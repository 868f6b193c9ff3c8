//! Id files: small text files pointing at a persisted entity.
//!
//! Layout: `<id>::<type>[::<platform_block>[::<extra>]]` on a single line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{invalid, io_error, ErrorInfo, OrchError};
use crate::ids::{Identified, ItemType};

const SEPARATOR: &str = "::";

/// Parsed content of an id file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFileRecord {
    /// Entity identifier.
    pub id: String,
    /// Entity kind, when recorded.
    pub item_type: Option<ItemType>,
    /// Platform configuration block name, when recorded.
    pub platform_block: Option<String>,
    /// Free-form trailing field.
    pub extra: Option<String>,
}

impl IdFileRecord {
    /// Renders the single-line representation, trimming trailing empty fields.
    pub fn render(&self) -> String {
        let mut fields = vec![
            self.id.clone(),
            self.item_type
                .map(|kind| kind.as_str().to_string())
                .unwrap_or_default(),
            self.platform_block.clone().unwrap_or_default(),
            self.extra.clone().unwrap_or_default(),
        ];
        while fields.len() > 1 && fields.last().is_some_and(|field| field.is_empty()) {
            fields.pop();
        }
        fields.join(SEPARATOR)
    }

    /// Parses a single-line representation holding one to four fields.
    pub fn parse(line: &str) -> Result<Self, OrchError> {
        let line = line.trim();
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if line.is_empty() || fields.len() > 4 {
            return Err(OrchError::Invalid(
                ErrorInfo::new("id_file.fields", "id file must hold one to four fields")
                    .with_context("fields", fields.len().to_string()),
            ));
        }
        let id = fields[0].trim();
        if id.is_empty() {
            return Err(invalid("id_file.empty_id", "id file has an empty id field"));
        }
        let optional = |idx: usize| {
            fields
                .get(idx)
                .map(|field| field.trim())
                .filter(|field| !field.is_empty())
                .map(str::to_string)
        };
        let item_type = optional(1).map(|kind| kind.parse()).transpose()?;
        Ok(Self {
            id: id.to_string(),
            item_type,
            platform_block: optional(2),
            extra: optional(3),
        })
    }
}

/// Conventional file name `<type>.<name>.id` for an entity.
pub fn id_file_name(item_type: ItemType, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    format!("{}.{}.id", item_type.as_str(), cleaned)
}

/// Default id file path for `entity` inside `dir`.
pub fn default_id_file_path(dir: &Path, entity: &dyn Identified) -> Result<PathBuf, OrchError> {
    let id = entity
        .id()
        .ok_or_else(|| invalid("id_file.unsaved", "entity has no backend id yet"))?;
    let name = entity.name().unwrap_or(id);
    Ok(dir.join(id_file_name(entity.item_type(), name)))
}

/// Writes an id file for a persisted entity.
pub fn write_id_file(
    path: &Path,
    entity: &dyn Identified,
    platform_block: Option<&str>,
    extra: Option<&str>,
) -> Result<IdFileRecord, OrchError> {
    let id = entity.id().ok_or_else(|| {
        OrchError::Invalid(
            ErrorInfo::new("id_file.unsaved", "cannot write an id file for an unsaved entity")
                .with_context("item_type", entity.item_type().as_str()),
        )
    })?;
    let record = IdFileRecord {
        id: id.to_string(),
        item_type: Some(entity.item_type()),
        platform_block: platform_block.map(str::to_string),
        extra: extra.map(str::to_string),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| io_error("id_file.create_dir", parent.display(), err))?;
    }
    replace_file(path, record.render().as_bytes()).map_err(|err| io_error("id_file.write", path.display(), err))?;
    Ok(record)
}

/// Writes through a sibling temporary file so readers never see a partial id.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("id");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let result = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reads an id file written by [`write_id_file`] or by hand.
pub fn read_id_file(path: &Path) -> Result<IdFileRecord, OrchError> {
    let text =
        fs::read_to_string(path).map_err(|err| io_error("id_file.read", path.display(), err))?;
    let line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| invalid("id_file.empty", format!("{} is empty", path.display())))?;
    IdFileRecord::parse(line)
}
