//! Editing persona presets from typed commands.
//!
//! Presets are addressed by their 1-based position in the listing. Fields
//! are separated by `|`:
//!
//! ```text
//! add <character> | <voice> | <instructions>
//! edit <n> <character> | <voice> | <instructions>
//! rm <n>
//! ```

use crate::store::JsonFileStore;
use anyhow::{Context, bail};
use parley_core::{generic_types::Voice, persona::PersonaBook};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetFields {
    pub character: String,
    pub voice: Voice,
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetEdit {
    Add(PresetFields),
    Update { position: usize, fields: PresetFields },
    Remove { position: usize },
}

impl FromStr for PresetFields {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.splitn(3, '|').map(str::trim);
        let (Some(character), Some(voice), Some(instructions)) =
            (parts.next(), parts.next(), parts.next())
        else {
            bail!("expected <character> | <voice> | <instructions>");
        };
        Ok(Self {
            character: character.to_string(),
            voice: voice.parse()?,
            instructions: instructions.to_string(),
        })
    }
}

fn parse_position(s: &str) -> anyhow::Result<usize> {
    s.parse::<usize>()
        .ok()
        .filter(|&n| n > 0)
        .with_context(|| format!("'{s}' is not a preset number"))
}

impl FromStr for PresetEdit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (verb, rest) = s.trim().split_once(' ').unwrap_or((s.trim(), ""));
        let rest = rest.trim();
        match verb {
            "add" => Ok(Self::Add(rest.parse()?)),
            "edit" => {
                let (position, fields) = rest
                    .split_once(' ')
                    .context("expected edit <n> <character> | <voice> | <instructions>")?;
                Ok(Self::Update {
                    position: parse_position(position)?,
                    fields: fields.parse()?,
                })
            }
            "rm" => Ok(Self::Remove {
                position: parse_position(rest)?,
            }),
            other => bail!("unknown preset edit '{other}'"),
        }
    }
}

/// Applies `edit` and saves the whole book.
///
/// # Returns
///
/// A one-line summary of what changed.
pub fn apply_edit(
    edit: PresetEdit,
    book: &mut PersonaBook,
    store: &JsonFileStore,
) -> anyhow::Result<String> {
    let id_at = |book: &PersonaBook, position: usize| {
        book.presets()
            .get(position - 1)
            .map(|p| p.id.clone())
            .with_context(|| format!("no preset {position}, see /personas"))
    };
    let summary = match edit {
        PresetEdit::Add(f) => {
            let added = book.add(&f.character, &f.instructions, f.voice)?;
            format!("added preset {}", added.character)
        }
        PresetEdit::Update { position, fields: f } => {
            let id = id_at(book, position)?;
            let updated = book.update(&id, &f.character, &f.instructions, f.voice)?;
            format!("updated preset {}", updated.character)
        }
        PresetEdit::Remove { position } => {
            let id = id_at(book, position)?;
            let removed = book.remove(&id)?;
            format!("removed preset {}", removed.character)
        }
    };
    store
        .save_personas(book)
        .context("Failed to save persona presets")?;
    info!(presets = book.presets().len(), "Persona presets saved");
    Ok(summary)
}
