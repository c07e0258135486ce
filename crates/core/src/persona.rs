//! Persona presets: named combinations of instructions and voice that can be
//! applied to the session configuration.

use crate::{error::PersonaError, generic_types::Voice};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_PERSONA_ID: &str = "default";
pub const MAX_CHARACTER_LEN: usize = 18;
pub const MAX_INSTRUCTIONS_LEN: usize = 500;

const DEFAULT_INSTRUCTIONS: &str = "You are a friendly, humorous assistant who talks like a \
senior colleague at the user's company. Empathize with their worries and give your best \
suggestion for each question or concern.\n\
Personality:\n\
Speak a little fast, in a bright, crisp and casual tone.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub character: String,
    pub instructions: String,
    pub voice: Voice,
}

pub fn default_persona() -> Persona {
    Persona {
        id: DEFAULT_PERSONA_ID.to_string(),
        character: "Default".to_string(),
        instructions: DEFAULT_INSTRUCTIONS.to_string(),
        voice: Voice::Ballad,
    }
}

fn validate(character: &str, instructions: &str) -> Result<(), PersonaError> {
    if character.trim().is_empty() {
        return Err(PersonaError::EmptyCharacter);
    }
    if character.chars().count() > MAX_CHARACTER_LEN {
        return Err(PersonaError::CharacterTooLong(MAX_CHARACTER_LEN));
    }
    if instructions.trim().is_empty() {
        return Err(PersonaError::EmptyInstructions);
    }
    if instructions.chars().count() > MAX_INSTRUCTIONS_LEN {
        return Err(PersonaError::InstructionsTooLong(MAX_INSTRUCTIONS_LEN));
    }
    Ok(())
}

/// The ordered preset list. The default preset is always present and first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaBook {
    presets: Vec<Persona>,
}

impl Default for PersonaBook {
    fn default() -> Self {
        Self {
            presets: vec![default_persona()],
        }
    }
}

impl PersonaBook {
    /// Restores saved presets, re-inserting the default one if it is missing.
    pub fn from_saved(mut presets: Vec<Persona>) -> Self {
        if !presets.iter().any(|p| p.id == DEFAULT_PERSONA_ID) {
            presets.insert(0, default_persona());
        }
        Self { presets }
    }

    pub fn presets(&self) -> &[Persona] {
        &self.presets
    }

    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn add(
        &mut self,
        character: &str,
        instructions: &str,
        voice: Voice,
    ) -> Result<&Persona, PersonaError> {
        validate(character, instructions)?;
        let persona = Persona {
            id: Uuid::new_v4().to_string(),
            character: character.to_string(),
            instructions: instructions.to_string(),
            voice,
        };
        info!(id = %persona.id, character = %persona.character, "Persona added");
        self.presets.push(persona);
        Ok(&self.presets[self.presets.len() - 1])
    }

    pub fn update(
        &mut self,
        id: &str,
        character: &str,
        instructions: &str,
        voice: Voice,
    ) -> Result<&Persona, PersonaError> {
        validate(character, instructions)?;
        let persona = self
            .presets
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;
        persona.character = character.to_string();
        persona.instructions = instructions.to_string();
        persona.voice = voice;
        Ok(persona)
    }

    pub fn remove(&mut self, id: &str) -> Result<Persona, PersonaError> {
        if id == DEFAULT_PERSONA_ID {
            return Err(PersonaError::DefaultUndeletable);
        }
        let pos = self
            .presets
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))?;
        Ok(self.presets.remove(pos))
    }

    pub fn into_presets(self) -> Vec<Persona> {
        self.presets
    }
}
